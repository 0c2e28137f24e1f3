//! This module contains the [ConnectionRef] struct.

use std::sync::Arc;
use std::sync::Weak;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Error;
use crate::error::Result;
use crate::transport::ConnectionInterface;
use crate::transport::IceCandidate;
use crate::transport::WebrtcConnectionState;

/// A weak reference to a connection that implements [ConnectionInterface].
/// When the underlying connection is dropped, every method returns
/// [Error::ConnectionReleased]. It serves as the return value for the
/// `connection` method of [DirectTransport](crate::DirectTransport).
pub struct ConnectionRef<C> {
    sid: String,
    conn: Weak<C>,
}

impl<C> Clone for ConnectionRef<C> {
    fn clone(&self) -> Self {
        Self {
            sid: self.sid.clone(),
            conn: self.conn.clone(),
        }
    }
}

impl<C> ConnectionRef<C> {
    /// Create a new connection reference.
    pub fn new(sid: &str, conn: &Arc<C>) -> Self {
        Self {
            sid: sid.to_string(),
            conn: Arc::downgrade(conn),
        }
    }

    pub(crate) fn upgrade(&self) -> Result<Arc<C>> {
        match self.conn.upgrade() {
            Some(conn) => Ok(conn),
            None => Err(Error::ConnectionReleased(self.sid.clone())),
        }
    }
}

#[async_trait]
impl<C, S> ConnectionInterface for ConnectionRef<C>
where
    C: ConnectionInterface<Error = Error, Sdp = S> + Send + Sync,
    for<'async_trait> S: Serialize + DeserializeOwned + Send + Sync + 'async_trait,
{
    type Sdp = C::Sdp;
    type Error = C::Error;

    async fn send_message(&self, payload: &[u8]) -> Result<()> {
        self.upgrade()?.send_message(payload).await
    }

    fn webrtc_connection_state(&self) -> WebrtcConnectionState {
        self.upgrade()
            .map(|c| c.webrtc_connection_state())
            .unwrap_or(WebrtcConnectionState::Closed)
    }

    async fn webrtc_create_offer(&self) -> Result<Self::Sdp> {
        self.upgrade()?.webrtc_create_offer().await
    }

    async fn webrtc_answer_offer(&self, offer: Self::Sdp) -> Result<Self::Sdp> {
        self.upgrade()?.webrtc_answer_offer(offer).await
    }

    async fn webrtc_accept_answer(&self, answer: Self::Sdp) -> Result<()> {
        self.upgrade()?.webrtc_accept_answer(answer).await
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        self.upgrade()?.add_remote_candidate(candidate).await
    }

    async fn webrtc_wait_for_data_channel_open(&self) -> Result<()> {
        self.upgrade()?.webrtc_wait_for_data_channel_open().await
    }

    async fn close(&self) -> Result<()> {
        self.upgrade()?.close().await
    }
}
