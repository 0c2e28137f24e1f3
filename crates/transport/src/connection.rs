//! WebRTC-backed implementation of the transport traits.
//!
//! Each direct session owns exactly one [RTCPeerConnection] with a single data
//! channel labelled `"chat"`. The offerer creates the channel before producing
//! its offer; the answerer adopts it when the remote announcement arrives.
//! ICE candidates trickle: each locally gathered candidate is handed to the
//! owner through [TransportCallback](crate::callback::TransportCallback)
//! instead of blocking SDP generation on gathering completion.

use std::sync::Arc;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_candidate_type::RTCIceCandidateType;
use webrtc::ice_transport::ice_credential_type::RTCIceCredentialType;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::callback::BoxedTransportCallback;
use crate::callback::InnerTransportCallback;
use crate::connection_ref::ConnectionRef;
use crate::error::Error;
use crate::error::Result;
use crate::ice_server::IceCredentialType;
use crate::ice_server::IceServer;
use crate::notifier::Notifier;
use crate::pool::Pool;
use crate::transport::ConnectionInterface;
use crate::transport::ConnectionRole;
use crate::transport::IceCandidate;
use crate::transport::TransportInterface;
use crate::transport::WebrtcConnectionState;

const WEBRTC_WAIT_FOR_DATA_CHANNEL_OPEN_TIMEOUT: u8 = 8; // seconds
/// Label of the single data channel carrying session payloads.
pub const DATA_CHANNEL_LABEL: &str = "chat";

type ChannelSlot = Arc<Mutex<Option<Arc<RTCDataChannel>>>>;

/// A direct connection implemented by the webrtc-rs library.
pub struct DirectConnection {
    webrtc_conn: RTCPeerConnection,
    webrtc_data_channel: ChannelSlot,
    webrtc_data_channel_state_notifier: Notifier,
    cancel_token: CancellationToken,
}

/// [DirectTransport] manages all the [DirectConnection] and
/// provides methods to create, get and close connections.
pub struct DirectTransport {
    ice_servers: Vec<IceServer>,
    external_address: Option<String>,
    pool: Pool<DirectConnection>,
}

impl DirectConnection {
    fn new(
        webrtc_conn: RTCPeerConnection,
        webrtc_data_channel: ChannelSlot,
        webrtc_data_channel_state_notifier: Notifier,
    ) -> Self {
        Self {
            webrtc_conn,
            webrtc_data_channel,
            webrtc_data_channel_state_notifier,
            cancel_token: CancellationToken::new(),
        }
    }

    fn data_channel(&self) -> Result<Arc<RTCDataChannel>> {
        let Ok(slot) = self.webrtc_data_channel.lock() else {
            return Err(Error::DataChannelMissing);
        };
        slot.clone().ok_or(Error::DataChannelMissing)
    }

    fn data_channel_ready(&self) -> bool {
        self.data_channel()
            .map(|ch| ch.ready_state() == RTCDataChannelState::Open)
            .unwrap_or(false)
    }
}

impl DirectTransport {
    /// Create a new [DirectTransport] instance.
    /// `ice_servers` is a `;`-separated list of stun:// and turn:// urls.
    pub fn new(ice_servers: &str, external_address: Option<String>) -> Result<Self> {
        let ice_servers = IceServer::vec_from_str(ice_servers)?;

        Ok(Self {
            ice_servers,
            external_address,
            pool: Pool::new(),
        })
    }
}

/// Install the open, close and message handlers on a data channel.
/// Used for both the locally created channel of the offerer and the
/// remotely announced channel adopted by the answerer.
fn setup_data_channel(channel: &Arc<RTCDataChannel>, inner_cb: Arc<InnerTransportCallback>) {
    let on_open_inner_cb = inner_cb.clone();
    channel.on_open(Box::new(move || {
        Box::pin(async move { on_open_inner_cb.on_data_channel_open().await })
    }));

    let on_close_inner_cb = inner_cb.clone();
    channel.on_close(Box::new(move || {
        let inner_cb = on_close_inner_cb.clone();
        Box::pin(async move { inner_cb.on_data_channel_close().await })
    }));

    let on_message_inner_cb = inner_cb;
    channel.on_message(Box::new(move |msg: DataChannelMessage| {
        tracing::debug!(
            "Received DataChannelMessage from {}: {} bytes",
            on_message_inner_cb.sid,
            msg.data.len()
        );

        let inner_cb = on_message_inner_cb.clone();

        Box::pin(async move {
            inner_cb.on_message(&msg.data).await;
        })
    }));
}

#[async_trait]
impl ConnectionInterface for DirectConnection {
    type Sdp = String;
    type Error = Error;

    async fn send_message(&self, payload: &[u8]) -> Result<()> {
        self.webrtc_wait_for_data_channel_open().await?;
        let channel = self.data_channel()?;
        let data = Bytes::copy_from_slice(payload);
        if let Err(e) = channel.send(&data).await {
            tracing::error!("{:?}, Data size: {:?}", e, data.len());
            return Err(e.into());
        }
        Ok(())
    }

    fn webrtc_connection_state(&self) -> WebrtcConnectionState {
        self.webrtc_conn.connection_state().into()
    }

    async fn webrtc_create_offer(&self) -> Result<Self::Sdp> {
        let offer = self.webrtc_conn.create_offer(None).await?;
        self.webrtc_conn.set_local_description(offer.clone()).await?;
        Ok(offer.sdp)
    }

    async fn webrtc_answer_offer(&self, offer: Self::Sdp) -> Result<Self::Sdp> {
        tracing::debug!("webrtc_answer_offer, offer: {offer:?}");
        let offer = RTCSessionDescription::offer(offer)?;
        self.webrtc_conn.set_remote_description(offer).await?;

        let answer = self.webrtc_conn.create_answer(None).await?;
        self.webrtc_conn
            .set_local_description(answer.clone())
            .await?;

        Ok(answer.sdp)
    }

    async fn webrtc_accept_answer(&self, answer: Self::Sdp) -> Result<()> {
        tracing::debug!("webrtc_accept_answer, answer: {answer:?}");
        let answer = RTCSessionDescription::answer(answer)?;
        self.webrtc_conn
            .set_remote_description(answer)
            .await
            .map_err(|e| e.into())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: None,
        };
        self.webrtc_conn
            .add_ice_candidate(init)
            .await
            .map_err(|e| e.into())
    }

    async fn webrtc_wait_for_data_channel_open(&self) -> Result<()> {
        if matches!(
            self.webrtc_connection_state(),
            WebrtcConnectionState::Failed
                | WebrtcConnectionState::Closed
                | WebrtcConnectionState::Disconnected
        ) {
            return Err(Error::DataChannelOpen("Connection unavailable".to_string()));
        }

        if self.data_channel_ready() {
            return Ok(());
        }

        self.webrtc_data_channel_state_notifier
            .set_timeout(WEBRTC_WAIT_FOR_DATA_CHANNEL_OPEN_TIMEOUT);
        self.webrtc_data_channel_state_notifier.clone().await;

        if self.data_channel_ready() {
            Ok(())
        } else {
            Err(Error::DataChannelOpen(format!(
                "DataChannel not open in {WEBRTC_WAIT_FOR_DATA_CHANNEL_OPEN_TIMEOUT} seconds"
            )))
        }
    }

    async fn close(&self) -> Result<()> {
        self.cancel_token.cancel();
        self.webrtc_conn.close().await.map_err(|e| e.into())
    }
}

#[async_trait]
impl TransportInterface for DirectTransport {
    type Connection = DirectConnection;
    type Error = Error;

    async fn new_connection(
        &self,
        sid: &str,
        role: ConnectionRole,
        callback: BoxedTransportCallback,
    ) -> Result<()> {
        if let Ok(existed_conn) = self.pool.connection(sid) {
            if matches!(
                existed_conn.webrtc_connection_state(),
                WebrtcConnectionState::New
                    | WebrtcConnectionState::Connecting
                    | WebrtcConnectionState::Connected
            ) {
                return Err(Error::ConnectionAlreadyExists(sid.to_string()));
            }
        }

        //
        // Setup webrtc connection env
        //
        let ice_servers = self.ice_servers.iter().cloned().map(|x| x.into()).collect();

        let webrtc_config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let mut setting = webrtc::api::setting_engine::SettingEngine::default();
        if let Some(ref addr) = self.external_address {
            tracing::debug!("setting external ip {:?}", addr);
            setting.set_nat_1to1_ips(vec![addr.to_string()], RTCIceCandidateType::Host);
        }
        setting.set_ice_multicast_dns_mode(MulticastDnsMode::Disabled);

        let webrtc_api = webrtc::api::APIBuilder::new()
            .with_setting_engine(setting)
            .build();

        //
        // Create webrtc connection
        //
        let webrtc_conn: RTCPeerConnection = webrtc_api.new_peer_connection(webrtc_config).await?;

        //
        // Set callbacks
        //
        let webrtc_data_channel_state_notifier = Notifier::default();
        let inner_cb = Arc::new(InnerTransportCallback::new(
            sid,
            callback,
            webrtc_data_channel_state_notifier.clone(),
        ));

        let channel_slot: ChannelSlot = Arc::new(Mutex::new(None));

        // The answerer receives the channel through this announcement. An
        // already occupied slot keeps its channel.
        let slot_ref = channel_slot.clone();
        let data_channel_inner_cb = inner_cb.clone();
        webrtc_conn.on_data_channel(Box::new(move |d: Arc<RTCDataChannel>| {
            let d_label = d.label().to_string();
            let d_id = d.id();
            tracing::debug!("New DataChannel {d_label} {d_id}");

            if let Ok(mut slot) = slot_ref.lock() {
                if slot.is_none() {
                    setup_data_channel(&d, data_channel_inner_cb.clone());
                    *slot = Some(d);
                }
            }

            Box::pin(async move {})
        }));

        let candidate_inner_cb = inner_cb.clone();
        webrtc_conn.on_ice_candidate(Box::new(move |c: Option<RTCIceCandidate>| {
            let inner_cb = candidate_inner_cb.clone();

            Box::pin(async move {
                // None marks the end of gathering.
                let Some(c) = c else { return };
                match c.to_json() {
                    Ok(init) => {
                        inner_cb
                            .on_local_candidate(IceCandidate {
                                candidate: init.candidate,
                                sdp_mid: init.sdp_mid,
                                sdp_mline_index: init.sdp_mline_index,
                            })
                            .await;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to serialize local candidate: {e:?}");
                    }
                }
            })
        }));

        let peer_connection_state_change_inner_cb = inner_cb.clone();
        webrtc_conn.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            tracing::debug!("Peer Connection State has changed: {s:?}");

            let inner_cb = peer_connection_state_change_inner_cb.clone();

            Box::pin(async move {
                inner_cb.on_peer_connection_state_change(s.into()).await;
            })
        }));

        //
        // Create data channel (offerer side only)
        //
        if role == ConnectionRole::Offerer {
            let ch = webrtc_conn
                .create_data_channel(DATA_CHANNEL_LABEL, None)
                .await?;
            setup_data_channel(&ch, inner_cb.clone());
            if let Ok(mut slot) = channel_slot.lock() {
                *slot = Some(ch);
            }
        }

        //
        // Construct the Connection
        //
        let conn = DirectConnection::new(
            webrtc_conn,
            channel_slot,
            webrtc_data_channel_state_notifier,
        );

        self.pool.safely_insert(sid, conn)?;
        Ok(())
    }

    async fn close_connection(&self, sid: &str) -> Result<()> {
        self.pool.safely_remove(sid).await
    }

    fn connection(&self, sid: &str) -> Result<ConnectionRef<Self::Connection>> {
        self.pool.connection(sid)
    }

    fn connection_ids(&self) -> Vec<String> {
        self.pool.connection_ids()
    }
}

impl From<IceCredentialType> for RTCIceCredentialType {
    fn from(s: IceCredentialType) -> Self {
        match s {
            IceCredentialType::Password => Self::Password,
            IceCredentialType::Oauth => Self::Oauth,
        }
    }
}

impl From<IceServer> for RTCIceServer {
    fn from(s: IceServer) -> Self {
        Self {
            urls: s.urls,
            username: s.username,
            credential: s.credential,
            credential_type: s.credential_type.into(),
        }
    }
}

impl From<RTCPeerConnectionState> for WebrtcConnectionState {
    fn from(s: RTCPeerConnectionState) -> Self {
        match s {
            RTCPeerConnectionState::Unspecified => Self::Unspecified,
            RTCPeerConnectionState::New => Self::New,
            RTCPeerConnectionState::Connecting => Self::Connecting,
            RTCPeerConnectionState::Connected => Self::Connected,
            RTCPeerConnectionState::Disconnected => Self::Disconnected,
            RTCPeerConnectionState::Failed => Self::Failed,
            RTCPeerConnectionState::Closed => Self::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::CallbackError;
    use crate::callback::TransportCallback;

    struct TestCallback;

    #[async_trait]
    impl TransportCallback for TestCallback {
        async fn on_message(&self, _sid: &str, _msg: &[u8]) -> std::result::Result<(), CallbackError> {
            Ok(())
        }

        async fn on_local_candidate(
            &self,
            _sid: &str,
            _candidate: IceCandidate,
        ) -> std::result::Result<(), CallbackError> {
            Ok(())
        }

        async fn on_peer_connection_state_change(
            &self,
            _sid: &str,
            _state: WebrtcConnectionState,
        ) -> std::result::Result<(), CallbackError> {
            Ok(())
        }
    }

    fn new_transport() -> DirectTransport {
        DirectTransport::new("stun://stun.l.google.com:19302", None).unwrap()
    }

    #[test]
    fn test_bad_ice_server_string_rejected() {
        assert!(DirectTransport::new("http://not-ice.example.org", None).is_err());
    }

    #[tokio::test]
    async fn test_duplicate_connection_rejected_while_viable() {
        let trans = new_transport();
        trans
            .new_connection("session-1", ConnectionRole::Offerer, TestCallback.boxed())
            .await
            .unwrap();

        let err = trans
            .new_connection("session-1", ConnectionRole::Offerer, TestCallback.boxed())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ConnectionAlreadyExists(_)));
    }

    #[tokio::test]
    async fn test_offerer_creates_local_offer() {
        let trans = new_transport();
        trans
            .new_connection("session-2", ConnectionRole::Offerer, TestCallback.boxed())
            .await
            .unwrap();

        let conn = trans.connection("session-2").unwrap();
        let offer = conn.webrtc_create_offer().await.unwrap();
        assert!(offer.contains("v=0"));
    }

    #[tokio::test]
    async fn test_answerer_has_no_channel_before_offer() {
        let trans = new_transport();
        trans
            .new_connection("session-3", ConnectionRole::Answerer, TestCallback.boxed())
            .await
            .unwrap();

        let conn = trans.connection("session-3").unwrap().upgrade().unwrap();
        assert!(matches!(
            conn.data_channel(),
            Err(Error::DataChannelMissing)
        ));
    }

    #[tokio::test]
    async fn test_released_reference_errors() {
        let trans = new_transport();
        trans
            .new_connection("session-4", ConnectionRole::Offerer, TestCallback.boxed())
            .await
            .unwrap();

        let conn = trans.connection("session-4").unwrap();
        trans.close_connection("session-4").await.unwrap();

        let err = conn.webrtc_create_offer().await.unwrap_err();
        assert!(matches!(err, Error::ConnectionReleased(_)));
        assert!(trans.connection("session-4").is_err());
    }
}
