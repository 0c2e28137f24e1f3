//! Core traits and plain data types of the transport layer.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde::Serialize;

use crate::callback::BoxedTransportCallback;
use crate::connection_ref::ConnectionRef;

/// Which side of the handshake this connection plays.
///
/// The offerer creates the single `"chat"` data channel; the answerer adopts it
/// when the remote channel announcement arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRole {
    /// Creates the offer and the data channel.
    Offerer,
    /// Answers the offer and waits for the remote data channel.
    Answerer,
}

/// Peer connection states, mirrored from the underlying webrtc stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebrtcConnectionState {
    /// State unknown to the underlying stack.
    Unspecified,
    /// Freshly created, no handshake yet.
    New,
    /// Handshake in progress.
    Connecting,
    /// Direct channel usable.
    Connected,
    /// Transport lost; may recover or fail.
    Disconnected,
    /// Negotiation or transport failed permanently.
    Failed,
    /// Torn down.
    Closed,
}

/// One ICE candidate, in the shape the signaling relay carries.
///
/// Used in both directions: locally gathered candidates are handed to the owner
/// through [crate::callback::TransportCallback::on_local_candidate], and remote
/// candidates from polling are fed back with
/// [ConnectionInterface::add_remote_candidate].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    /// The candidate line.
    pub candidate: String,
    /// Media stream identification tag.
    #[serde(default)]
    pub sdp_mid: Option<String>,
    /// Index of the media description the candidate belongs to.
    #[serde(default)]
    pub sdp_mline_index: Option<u16>,
}

impl IceCandidate {
    /// A stable fingerprint for client-side dedup of at-least-once delivery.
    pub fn fingerprint(&self) -> String {
        format!(
            "{}|{}|{}",
            self.candidate,
            self.sdp_mid.as_deref().unwrap_or(""),
            self.sdp_mline_index.map(|i| i.to_string()).unwrap_or_default()
        )
    }
}

/// Operations available on a single direct connection.
#[async_trait]
pub trait ConnectionInterface: Send + Sync {
    /// SDP representation exchanged through the signaling relay.
    type Sdp: Serialize + DeserializeOwned + Send + Sync;
    /// Error type of the implementation.
    type Error: std::error::Error;

    /// Ship a payload over the data channel, waiting for it to open first.
    async fn send_message(&self, payload: &[u8]) -> Result<(), Self::Error>;

    /// Current peer connection state.
    fn webrtc_connection_state(&self) -> WebrtcConnectionState;

    /// Create an offer and install it as the local description.
    async fn webrtc_create_offer(&self) -> Result<Self::Sdp, Self::Error>;

    /// Install a remote offer and produce the local answer.
    async fn webrtc_answer_offer(&self, offer: Self::Sdp) -> Result<Self::Sdp, Self::Error>;

    /// Install the remote answer. Must be called at most once per connection;
    /// the caller guards against re-applying an already-applied answer.
    async fn webrtc_accept_answer(&self, answer: Self::Sdp) -> Result<(), Self::Error>;

    /// Feed one remote ICE candidate received from the relay.
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), Self::Error>;

    /// Resolve once the data channel is open, or fail after a timeout.
    async fn webrtc_wait_for_data_channel_open(&self) -> Result<(), Self::Error>;

    /// Tear the connection down and cancel pending work.
    async fn close(&self) -> Result<(), Self::Error>;
}

/// Manager of all live direct connections, keyed by signaling session id.
#[async_trait]
pub trait TransportInterface {
    /// Connection type produced by this transport.
    type Connection: ConnectionInterface<Error = Self::Error>;
    /// Error type of the implementation.
    type Error: std::error::Error;

    /// Create a connection for `sid`. Fails with `ConnectionAlreadyExists` while
    /// a previous connection for the same session is still viable.
    async fn new_connection(
        &self,
        sid: &str,
        role: ConnectionRole,
        callback: BoxedTransportCallback,
    ) -> Result<(), Self::Error>;

    /// Look up a connection by session id.
    fn connection(&self, sid: &str) -> Result<ConnectionRef<Self::Connection>, Self::Error>;

    /// Ids of all live connections.
    fn connection_ids(&self) -> Vec<String>;

    /// Close and release the connection for `sid`.
    async fn close_connection(&self, sid: &str) -> Result<(), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candidate_fingerprint_distinguishes() {
        let a = IceCandidate {
            candidate: "candidate:1 1 udp 1 10.0.0.1 5000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };
        let mut b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.sdp_mline_index = Some(1);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_candidate_snake_case_wire_form() {
        let c: IceCandidate = serde_json::from_str(
            r#"{"candidate":"candidate:1","sdp_mid":"0","sdp_mline_index":0}"#,
        )
        .unwrap();
        assert_eq!(c.sdp_mid.as_deref(), Some("0"));
        // missing optional fields default to None
        let c: IceCandidate = serde_json::from_str(r#"{"candidate":"candidate:2"}"#).unwrap();
        assert_eq!(c.sdp_mline_index, None);
    }
}
