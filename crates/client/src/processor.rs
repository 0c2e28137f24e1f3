//! Processor of chat operations.
//!
//! The [Processor] is the handle the CLI and any embedding application work
//! through. It owns the HTTP client, the single room channel, the direct
//! transport and the live session table, and exposes the chat operations as
//! plain async methods.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Deserialize;
use serde::Serialize;
use talka_core::FileTag;
use talka_core::Identity;
use talka_core::RoomMember;
use talka_transport::DirectTransport;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::api::ApiClient;
use crate::api::PendingSession;
use crate::api::Profile;
use crate::api::Room;
use crate::api::TokenResponse;
use crate::api::UploadedFile;
use crate::error::Error;
use crate::error::Result;
use crate::room::BoxedRoomCallback;
use crate::room::RoomChannelManager;
use crate::signaling::BoxedP2pEvents;
use crate::signaling::P2pSession;
use crate::signaling::SessionState;

/// Name of the room every client lands in.
pub const GENERAL_ROOM_NAME: &str = "General";
/// Join code of the general room.
pub const GENERAL_ROOM_CODE: &str = "public";
/// Steady period of the pending-requests watcher.
const PENDING_POLL_PERIOD: Duration = Duration::from_secs(5);
/// Consecutive watcher failures tolerated before a backoff ceiling applies.
const PENDING_POLL_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// [ProcessorConfig] is usually constructed from a [crate::config::Config]
/// loaded from disk, but can be built directly when embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    endpoint_url: String,
    ice_servers: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    external_address: Option<String>,
    identity: Identity,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
}

impl ProcessorConfig {
    pub fn new(endpoint_url: String, ice_servers: String, identity: Identity) -> Self {
        Self {
            endpoint_url,
            ice_servers,
            external_address: None,
            identity,
            token: None,
        }
    }

    /// Publish `address` as a host candidate instead of the interface address.
    pub fn external_address(mut self, address: String) -> Self {
        self.external_address = Some(address);
        self
    }

    /// Install a bearer token from a previous login.
    pub fn token(mut self, token: String) -> Self {
        self.token = Some(token);
        self
    }
}

/// Builder of [Processor].
pub struct ProcessorBuilder {
    config: ProcessorConfig,
    p2p_events: Option<BoxedP2pEvents>,
}

impl ProcessorBuilder {
    pub fn from_config(config: &ProcessorConfig) -> Self {
        Self {
            config: config.clone(),
            p2p_events: None,
        }
    }

    /// Sink for direct-session events. Sessions created without one fall back
    /// to a logging sink.
    pub fn p2p_events(mut self, events: BoxedP2pEvents) -> Self {
        self.p2p_events = Some(events);
        self
    }

    pub fn build(self) -> Result<Processor> {
        let api = Arc::new(ApiClient::new(
            &self.config.endpoint_url,
            self.config.identity.clone(),
        )?);
        api.set_token(self.config.token.clone());

        let transport = Arc::new(DirectTransport::new(
            &self.config.ice_servers,
            self.config.external_address.clone(),
        )?);

        Ok(Processor {
            identity: self.config.identity,
            api,
            rooms: RoomChannelManager::new(),
            transport,
            sessions: DashMap::new(),
            p2p_events: self.p2p_events.unwrap_or_else(|| Arc::new(LoggingP2pEvents)),
            cancel_token: CancellationToken::new(),
        })
    }
}

/// Entry of the chat operations.
pub struct Processor {
    /// The identity this processor acts as.
    pub identity: Identity,
    api: Arc<ApiClient>,
    rooms: RoomChannelManager,
    transport: Arc<DirectTransport>,
    sessions: DashMap<String, Arc<P2pSession>>,
    p2p_events: BoxedP2pEvents,
    cancel_token: CancellationToken,
}

impl Processor {
    /// The underlying HTTP client.
    pub fn api(&self) -> Arc<ApiClient> {
        self.api.clone()
    }

    // rooms

    /// List all rooms.
    pub async fn list_rooms(&self) -> Result<Vec<Room>> {
        self.api.list_rooms().await
    }

    /// Create a room.
    pub async fn create_room(&self, name: &str, code: &str) -> Result<Room> {
        self.api.create_room(name, code).await
    }

    /// Find or create the general room and join it. Joining is idempotent, so
    /// calling this on every startup is fine.
    pub async fn ensure_general_room(&self) -> Result<Room> {
        let rooms = self.api.list_rooms().await?;
        let general = rooms.into_iter().find(|r| {
            r.name.eq_ignore_ascii_case(GENERAL_ROOM_NAME)
                || r.code.as_deref() == Some(GENERAL_ROOM_CODE)
        });

        let room = match general {
            Some(room) => room,
            None => match self.api.create_room(GENERAL_ROOM_NAME, GENERAL_ROOM_CODE).await {
                Ok(room) => room,
                // another client created it first
                Err(Error::Conflict(_)) => {
                    let rooms = self.api.list_rooms().await?;
                    rooms
                        .into_iter()
                        .find(|r| r.name.eq_ignore_ascii_case(GENERAL_ROOM_NAME))
                        .ok_or_else(|| Error::NotFound(GENERAL_ROOM_NAME.to_string()))?
                }
                Err(e) => return Err(e),
            },
        };

        self.api.join_room(&room.id).await?;
        Ok(room)
    }

    /// Join `room_id` and attach the live channel to it, closing the previous
    /// channel first.
    pub async fn switch_room(&self, room_id: &str, callback: BoxedRoomCallback) -> Result<()> {
        self.api.join_room(room_id).await?;
        let url = self.api.ws_general_url(room_id)?;
        self.rooms.switch(room_id, url, callback).await?;
        Ok(())
    }

    /// Send a chat message to the joined room.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        let Some(channel) = self.rooms.current().await else {
            return Err(Error::NoRoomJoined);
        };
        channel.send_text(text).await
    }

    /// Roster of the joined room, as currently known.
    pub async fn room_members(&self) -> Result<Vec<RoomMember>> {
        let Some(channel) = self.rooms.current().await else {
            return Err(Error::NoRoomJoined);
        };
        Ok(channel.members())
    }

    /// Upload a file and share it in the joined room as a file-tag message.
    pub async fn send_file(
        &self,
        filename: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadedFile> {
        let Some(channel) = self.rooms.current().await else {
            return Err(Error::NoRoomJoined);
        };
        let uploaded = self.api.upload_file(filename, content_type, bytes).await?;
        let tag = FileTag {
            id: uploaded.id.clone(),
            filename: uploaded
                .filename
                .clone()
                .unwrap_or_else(|| filename.to_string()),
            content_type: uploaded
                .content_type
                .clone()
                .unwrap_or_else(|| content_type.to_string()),
        };
        channel.send_text(&tag.render()).await?;
        Ok(uploaded)
    }

    /// Fetch the bytes of a shared file.
    pub async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        self.api.download_file(file_id).await
    }

    /// Delete an uploaded file.
    pub async fn delete_file(&self, file_id: &str) -> Result<()> {
        self.api.delete_file(file_id).await
    }

    /// Delete a message by server id.
    pub async fn delete_message(&self, message_id: i64) -> Result<()> {
        self.api.delete_message(message_id).await
    }

    /// Report a message.
    pub async fn report_message(&self, message_id: i64, reason: &str) -> Result<()> {
        self.api.report_message(message_id, reason).await
    }

    // direct sessions

    /// Request a direct session with `target_user_id` and return the handle.
    /// The caller drives it with [P2pSession::connect_as_initiator].
    pub async fn request_p2p(&self, target_user_id: &str) -> Result<Arc<P2pSession>> {
        let pending = self.api.request_session(target_user_id).await?;
        let session = Arc::new(P2pSession::new(
            &pending.session_id,
            self.api.clone(),
            self.transport.clone(),
            self.p2p_events.clone(),
            SessionState::Pending,
        ));
        self.sessions
            .insert(pending.session_id.clone(), session.clone());
        Ok(session)
    }

    /// Build the handle for an incoming request. The caller drives it with
    /// [P2pSession::connect_as_responder].
    pub fn adopt_p2p(&self, session_id: &str) -> Arc<P2pSession> {
        if let Some(existing) = self.sessions.get(session_id) {
            return existing.clone();
        }
        let session = Arc::new(P2pSession::new(
            session_id,
            self.api.clone(),
            self.transport.clone(),
            self.p2p_events.clone(),
            SessionState::Pending,
        ));
        self.sessions
            .insert(session_id.to_string(), session.clone());
        session
    }

    /// Look up a live session.
    pub fn p2p_session(&self, session_id: &str) -> Result<Arc<P2pSession>> {
        self.sessions
            .get(session_id)
            .map(|s| s.clone())
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    /// Requests currently waiting for this user.
    pub async fn pending_p2p(&self) -> Result<Vec<PendingSession>> {
        self.api.pending_sessions().await
    }

    /// Watch for incoming requests. Each poll result is delivered on the
    /// returned channel; the watcher stops on shutdown or when the receiver
    /// is dropped.
    pub fn pending_updates(&self) -> mpsc::Receiver<Vec<PendingSession>> {
        let (tx, rx) = mpsc::channel(8);
        let api = self.api.clone();
        let cancel_token = self.cancel_token.clone();

        tokio::spawn(async move {
            let mut failures: u32 = 0;
            loop {
                match api.pending_sessions().await {
                    Ok(pending) => {
                        failures = 0;
                        if tx.send(pending).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        tracing::warn!("Pending watcher poll failed: {}", e);
                    }
                }

                let delay = PENDING_POLL_PERIOD
                    .saturating_mul(2u32.saturating_pow(failures))
                    .min(PENDING_POLL_MAX_BACKOFF);
                tokio::select! {
                    _ = cancel_token.cancelled() => break,
                    _ = tokio::time::sleep(delay) => {}
                }
            }
        });

        rx
    }

    /// Seal and send one message over a direct session.
    pub async fn send_p2p_text(&self, session_id: &str, text: &str) -> Result<()> {
        self.p2p_session(session_id)?.send_text(text).await
    }

    /// Close a direct session and forget it.
    pub async fn close_p2p(&self, session_id: &str) -> Result<()> {
        let Some((_, session)) = self.sessions.remove(session_id) else {
            return Err(Error::SessionNotFound(session_id.to_string()));
        };
        session.close().await;
        Ok(())
    }

    // auth

    /// Sign up with email and password. The returned token is installed.
    pub async fn signup(
        &self,
        email: &str,
        password: &str,
        display_name: Option<&str>,
    ) -> Result<TokenResponse> {
        self.api.signup(email, password, display_name).await
    }

    /// Log in with email and password. The returned token is installed.
    pub async fn login(&self, email: &str, password: &str) -> Result<TokenResponse> {
        self.api.login(email, password).await
    }

    /// Profile of the logged-in account.
    pub async fn me(&self) -> Result<Profile> {
        self.api.me().await
    }

    /// Start a password reset.
    pub async fn forgot_password(&self, email: &str) -> Result<()> {
        self.api.forgot_password(email).await
    }

    /// Complete a password reset.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<()> {
        self.api.reset_password(token, new_password).await
    }

    /// Confirm an email address. The returned token is installed.
    pub async fn confirm_email(&self, token: &str) -> Result<TokenResponse> {
        self.api.confirm_email(token).await
    }

    /// Close the room channel, every direct session and all watchers.
    pub async fn shutdown(&self) {
        self.cancel_token.cancel();
        self.rooms.leave().await;

        let sids: Vec<String> = self.sessions.iter().map(|s| s.key().clone()).collect();
        for sid in sids {
            if let Some((_, session)) = self.sessions.remove(&sid) {
                session.close().await;
            }
        }
    }
}

/// Default event sink: log and move on.
struct LoggingP2pEvents;

#[async_trait::async_trait]
impl crate::signaling::P2pEvents for LoggingP2pEvents {
    async fn on_ready(&self, sid: &str) {
        tracing::info!("Direct session {} ready", sid);
    }

    async fn on_message(&self, sid: &str, text: String) {
        tracing::info!("[{}] {}", sid, text);
    }

    async fn on_closed(&self, sid: &str) {
        tracing::info!("Direct session {} closed", sid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn test_processor() -> Processor {
        let mut config = Config::new();
        config.user_name = Some("ada".to_string());
        let cfg: ProcessorConfig = config.try_into().unwrap();
        ProcessorBuilder::from_config(&cfg).build().unwrap()
    }

    #[tokio::test]
    async fn test_send_text_without_room_fails() {
        let processor = test_processor();
        assert!(matches!(
            processor.send_text("hello").await,
            Err(Error::NoRoomJoined)
        ));
    }

    #[tokio::test]
    async fn test_room_members_without_room_fails() {
        let processor = test_processor();
        assert!(matches!(
            processor.room_members().await,
            Err(Error::NoRoomJoined)
        ));
    }

    #[test]
    fn test_adopt_p2p_is_idempotent() {
        let processor = test_processor();
        let a = processor.adopt_p2p("sess-1");
        let b = processor.adopt_p2p("sess-1");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_unknown_session_lookup_fails() {
        let processor = test_processor();
        assert!(matches!(
            processor.p2p_session("nope"),
            Err(Error::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_processor_config_builders() {
        let cfg = ProcessorConfig::new(
            "http://127.0.0.1:8000".to_string(),
            "stun://stun.l.google.com:19302".to_string(),
            Identity::generate(),
        )
        .external_address("1.2.3.4".to_string())
        .token("tok".to_string());
        assert_eq!(cfg.external_address.as_deref(), Some("1.2.3.4"));
        assert_eq!(cfg.token.as_deref(), Some("tok"));
    }
}
