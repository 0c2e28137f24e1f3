//! Callback traits for observing a direct connection.

use async_trait::async_trait;

use crate::notifier::Notifier;
use crate::transport::IceCandidate;
use crate::transport::WebrtcConnectionState;

/// Error type surfaced by callback implementations.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Events a connection owner can react to. Payloads arrive as the raw bytes of
/// the data channel message; decoding is the owner's business.
#[async_trait]
pub trait TransportCallback {
    /// Box the callback for handing to the transport.
    fn boxed(self) -> BoxedTransportCallback
    where Self: Sized + Send + Sync + 'static {
        Box::new(self)
    }

    /// A payload arrived over the data channel.
    async fn on_message(&self, sid: &str, msg: &[u8]) -> Result<(), CallbackError>;

    /// The local side gathered an ICE candidate that should go to the relay.
    async fn on_local_candidate(
        &self,
        sid: &str,
        candidate: IceCandidate,
    ) -> Result<(), CallbackError>;

    /// The peer connection changed state.
    async fn on_peer_connection_state_change(
        &self,
        sid: &str,
        state: WebrtcConnectionState,
    ) -> Result<(), CallbackError>;

    /// The data channel opened. Default is a no-op.
    async fn on_data_channel_open(&self, _sid: &str) -> Result<(), CallbackError> {
        Ok(())
    }

    /// The data channel closed. Default is a no-op.
    async fn on_data_channel_close(&self, _sid: &str) -> Result<(), CallbackError> {
        Ok(())
    }
}

/// Boxed [TransportCallback].
pub type BoxedTransportCallback = Box<dyn TransportCallback + Send + Sync>;

/// [InnerTransportCallback] wraps the boxed callback with per-connection plumbing:
/// it wakes the data channel notifier and shields the transport from callback errors.
pub struct InnerTransportCallback {
    /// Session id of the connection this callback is assigned to.
    pub sid: String,
    callback: BoxedTransportCallback,
    data_channel_state_notifier: Notifier,
}

impl InnerTransportCallback {
    /// Create a new [InnerTransportCallback].
    pub fn new(
        sid: &str,
        callback: BoxedTransportCallback,
        data_channel_state_notifier: Notifier,
    ) -> Self {
        Self {
            sid: sid.to_string(),
            callback,
            data_channel_state_notifier,
        }
    }

    /// Notify that the data channel is open.
    pub async fn on_data_channel_open(&self) {
        self.data_channel_state_notifier.wake();
        if let Err(e) = self.callback.on_data_channel_open(&self.sid).await {
            tracing::error!("Callback on_data_channel_open failed: {e:?}");
        }
    }

    /// Notify that the data channel is closed.
    pub async fn on_data_channel_close(&self) {
        self.data_channel_state_notifier.wake();
        if let Err(e) = self.callback.on_data_channel_close(&self.sid).await {
            tracing::error!("Callback on_data_channel_close failed: {e:?}");
        }
    }

    /// Invoked on binary message arrival over the data channel.
    pub async fn on_message(&self, msg: &[u8]) {
        if let Err(e) = self.callback.on_message(&self.sid, msg).await {
            tracing::error!("Callback on_message failed: {e:?}");
        }
    }

    /// Invoked for each locally gathered ICE candidate.
    pub async fn on_local_candidate(&self, candidate: IceCandidate) {
        if let Err(e) = self.callback.on_local_candidate(&self.sid, candidate).await {
            tracing::error!("Callback on_local_candidate failed: {e:?}");
        }
    }

    /// Invoked when the state of the peer connection has changed.
    pub async fn on_peer_connection_state_change(&self, s: WebrtcConnectionState) {
        if let Err(e) = self
            .callback
            .on_peer_connection_state_change(&self.sid, s)
            .await
        {
            tracing::error!("Callback on_peer_connection_state_change failed: {e:?}");
        }
    }
}
