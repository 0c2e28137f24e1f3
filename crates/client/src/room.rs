//! Room channel over WebSocket.
//!
//! A [RoomChannel] owns one `/ws/general` connection for one room. A reader
//! task drives the socket: it forwards outbound text, decodes inbound frames
//! into [RoomCallback] events and keeps the membership roster current. When
//! the socket drops without a local close, the task reconnects with a doubling
//! delay for a bounded number of attempts before reporting the channel closed.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use futures::SinkExt;
use futures::StreamExt;
use talka_core::encoding;
use talka_core::ChatMessage;
use talka_core::ClientFrame;
use talka_core::PresenceEvent;
use talka_core::RoomMember;
use talka_core::ServerFrame;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::error::Result;

/// Reconnect attempts before the channel gives up.
pub const ROOM_RECONNECT_MAX_ATTEMPTS: u32 = 5;
/// First reconnect delay; doubles per attempt.
pub const ROOM_RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Events surfaced by a room channel.
#[async_trait]
pub trait RoomCallback: Send + Sync {
    /// A chat message arrived.
    async fn on_message(&self, message: ChatMessage);
    /// The membership roster was replaced by a snapshot.
    async fn on_room_users(&self, users: Vec<RoomMember>);
    /// A member joined or left.
    async fn on_presence(&self, event: PresenceEvent, user_id: String, user_name: Option<String>);
    /// The channel is gone and will not reconnect on its own.
    async fn on_closed(&self) {}
}

/// Shared boxed callback.
pub type BoxedRoomCallback = Arc<dyn RoomCallback>;

/// Delay before reconnect attempt `attempt` (1-based), doubling from the base.
pub fn reconnect_delay(attempt: u32) -> Duration {
    ROOM_RECONNECT_BASE_DELAY * 2u32.saturating_pow(attempt.saturating_sub(1))
}

/// Fold one server frame into the membership roster.
///
/// Snapshots replace the roster wholesale. Presence deltas are applied
/// idempotently, so a replayed `join` or a `leave` for an unknown user is
/// harmless.
pub fn apply_membership(members: &mut Vec<RoomMember>, frame: &ServerFrame) {
    match frame {
        ServerFrame::RoomUsers { users, .. } => {
            *members = users.clone();
        }
        ServerFrame::Presence {
            event: PresenceEvent::Join,
            user_id,
            user_name,
        } => {
            if !members.iter().any(|m| &m.user_id == user_id) {
                members.push(RoomMember {
                    user_id: user_id.clone(),
                    user_name: user_name.clone(),
                });
            }
        }
        ServerFrame::Presence {
            event: PresenceEvent::Leave,
            user_id,
            ..
        } => {
            members.retain(|m| &m.user_id != user_id);
        }
        _ => {}
    }
}

/// An open channel to one room.
pub struct RoomChannel {
    room_id: String,
    outbound: mpsc::Sender<String>,
    cancel_token: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
    members: Arc<Mutex<Vec<RoomMember>>>,
}

impl RoomChannel {
    /// Connect to `url` and start the reader task.
    pub async fn open(room_id: &str, url: Url, callback: BoxedRoomCallback) -> Result<Self> {
        let (stream, _) = connect_async(url.clone()).await?;
        let (outbound_tx, outbound_rx) = mpsc::channel::<String>(64);
        let cancel_token = CancellationToken::new();
        let members: Arc<Mutex<Vec<RoomMember>>> = Arc::new(Mutex::new(vec![]));

        let reader = tokio::spawn(reader_loop(
            stream,
            url,
            outbound_rx,
            cancel_token.clone(),
            members.clone(),
            callback,
        ));

        Ok(Self {
            room_id: room_id.to_string(),
            outbound: outbound_tx,
            cancel_token,
            reader: Mutex::new(Some(reader)),
            members,
        })
    }

    /// The room this channel is attached to.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// Current roster snapshot.
    pub fn members(&self) -> Vec<RoomMember> {
        self.members.lock().map(|m| m.clone()).unwrap_or_default()
    }

    /// Send a chat message. The body is opaque-encoded before framing.
    pub async fn send_text(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(Error::Validation("message must not be empty".to_string()));
        }
        let frame = ClientFrame::Chat {
            content: encoding::opaque_encode(text),
        };
        let payload = serde_json::to_string(&frame)?;
        self.outbound
            .send(payload)
            .await
            .map_err(|_| Error::ChannelClosed)
    }

    /// Close the channel and wait for the reader task to finish.
    pub async fn close(&self) {
        self.cancel_token.cancel();
        let handle = self.reader.lock().ok().and_then(|mut r| r.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

async fn reader_loop(
    mut stream: WsStream,
    url: Url,
    mut outbound: mpsc::Receiver<String>,
    cancel_token: CancellationToken,
    members: Arc<Mutex<Vec<RoomMember>>>,
    callback: BoxedRoomCallback,
) {
    loop {
        let dropped = run_socket(
            &mut stream,
            &mut outbound,
            &cancel_token,
            &members,
            &callback,
        )
        .await;

        if !dropped || cancel_token.is_cancelled() {
            break;
        }

        match reconnect(&url, &cancel_token).await {
            Some(next) => {
                tracing::info!("Room channel reconnected");
                stream = next;
            }
            None => break,
        }
    }

    if let Ok(mut m) = members.lock() {
        m.clear();
    }
    callback.on_closed().await;
}

/// Drive one socket until it drops or the channel is cancelled.
/// Returns true when the socket dropped and a reconnect should be tried.
async fn run_socket(
    stream: &mut WsStream,
    outbound: &mut mpsc::Receiver<String>,
    cancel_token: &CancellationToken,
    members: &Arc<Mutex<Vec<RoomMember>>>,
    callback: &BoxedRoomCallback,
) -> bool {
    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                let _ = stream.close(None).await;
                return false;
            }
            out = outbound.recv() => {
                match out {
                    Some(payload) => {
                        if let Err(e) = stream.send(Message::Text(payload)).await {
                            tracing::warn!("Room channel send failed: {}", e);
                            return true;
                        }
                    }
                    None => {
                        let _ = stream.close(None).await;
                        return false;
                    }
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&text, members, callback).await;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) | None => return true,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!("Room channel read failed: {}", e);
                        return true;
                    }
                }
            }
        }
    }
}

async fn handle_frame(
    text: &str,
    members: &Arc<Mutex<Vec<RoomMember>>>,
    callback: &BoxedRoomCallback,
) {
    let frame: ServerFrame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::debug!("Dropping undecodable frame: {}", e);
            return;
        }
    };

    if let Ok(mut m) = members.lock() {
        apply_membership(&mut m, &frame);
    }

    match frame {
        ServerFrame::Message { .. } => {
            if let Some(message) = ChatMessage::from_frame(&frame) {
                callback.on_message(message).await;
            }
        }
        ServerFrame::RoomUsers { users, .. } => {
            callback.on_room_users(users).await;
        }
        ServerFrame::Presence {
            event,
            user_id,
            user_name,
        } => {
            callback.on_presence(event, user_id, user_name).await;
        }
        ServerFrame::Unknown => {
            tracing::debug!("Ignoring unknown frame tag");
        }
    }
}

async fn reconnect(url: &Url, cancel_token: &CancellationToken) -> Option<WsStream> {
    for attempt in 1..=ROOM_RECONNECT_MAX_ATTEMPTS {
        let delay = reconnect_delay(attempt);
        tokio::select! {
            _ = cancel_token.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        match connect_async(url.clone()).await {
            Ok((stream, _)) => return Some(stream),
            Err(e) => {
                tracing::warn!("Room reconnect attempt {} failed: {}", attempt, e);
            }
        }
    }
    None
}

/// Holds the single active room channel. Switching rooms closes the previous
/// channel completely before the new one opens.
pub struct RoomChannelManager {
    current: tokio::sync::Mutex<Option<Arc<RoomChannel>>>,
}

impl RoomChannelManager {
    pub fn new() -> Self {
        Self {
            current: tokio::sync::Mutex::new(None),
        }
    }

    /// The active channel, if a room is joined.
    pub async fn current(&self) -> Option<Arc<RoomChannel>> {
        self.current.lock().await.clone()
    }

    /// Close the active channel and attach to a new room.
    pub async fn switch(
        &self,
        room_id: &str,
        url: Url,
        callback: BoxedRoomCallback,
    ) -> Result<Arc<RoomChannel>> {
        let mut slot = self.current.lock().await;
        if let Some(prev) = slot.take() {
            prev.close().await;
        }
        let channel = Arc::new(RoomChannel::open(room_id, url, callback).await?);
        *slot = Some(channel.clone());
        Ok(channel)
    }

    /// Close the active channel, if any.
    pub async fn leave(&self) {
        let mut slot = self.current.lock().await;
        if let Some(prev) = slot.take() {
            prev.close().await;
        }
    }
}

impl Default for RoomChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: &str) -> RoomMember {
        RoomMember {
            user_id: id.to_string(),
            user_name: None,
        }
    }

    #[test]
    fn test_snapshot_replaces_roster() {
        let mut members = vec![member("stale")];
        apply_membership(
            &mut members,
            &ServerFrame::RoomUsers {
                room_id: None,
                users: vec![member("a"), member("b")],
            },
        );
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].user_id, "a");
    }

    #[test]
    fn test_presence_join_is_idempotent() {
        let mut members = vec![member("a")];
        let join = ServerFrame::Presence {
            event: PresenceEvent::Join,
            user_id: "a".to_string(),
            user_name: Some("Ada".to_string()),
        };
        apply_membership(&mut members, &join);
        apply_membership(&mut members, &join);
        assert_eq!(members.len(), 1);
    }

    #[test]
    fn test_presence_leave_unknown_user_is_harmless() {
        let mut members = vec![member("a")];
        apply_membership(
            &mut members,
            &ServerFrame::Presence {
                event: PresenceEvent::Leave,
                user_id: "ghost".to_string(),
                user_name: None,
            },
        );
        assert_eq!(members.len(), 1);
    }

    #[test]
    fn test_presence_leave_removes_member() {
        let mut members = vec![member("a"), member("b")];
        apply_membership(
            &mut members,
            &ServerFrame::Presence {
                event: PresenceEvent::Leave,
                user_id: "a".to_string(),
                user_name: None,
            },
        );
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].user_id, "b");
    }

    #[test]
    fn test_message_frame_leaves_roster_alone() {
        let mut members = vec![member("a")];
        let frame: ServerFrame =
            serde_json::from_str(r#"{"type":"message","sender_id":"a","content":"aGk="}"#).unwrap();
        apply_membership(&mut members, &frame);
        assert_eq!(members.len(), 1);
    }

    #[test]
    fn test_reconnect_delay_doubles() {
        assert_eq!(reconnect_delay(1), Duration::from_secs(1));
        assert_eq!(reconnect_delay(2), Duration::from_secs(2));
        assert_eq!(reconnect_delay(3), Duration::from_secs(4));
        assert_eq!(reconnect_delay(5), Duration::from_secs(16));
    }

    struct NoopEvents;

    #[async_trait]
    impl RoomCallback for NoopEvents {
        async fn on_message(&self, _message: ChatMessage) {}
        async fn on_room_users(&self, _users: Vec<RoomMember>) {}
        async fn on_presence(
            &self,
            _event: PresenceEvent,
            _user_id: String,
            _user_name: Option<String>,
        ) {
        }
    }

    /// Accepts WebSocket connections and drains them until close.
    async fn spawn_ws_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    while let Some(Ok(msg)) = ws.next().await {
                        if msg.is_close() {
                            break;
                        }
                    }
                });
            }
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn test_switch_closes_previous_channel() {
        let (addr, server) = spawn_ws_server().await;
        let url = Url::parse(&format!("ws://{}/ws/general?room_id=a", addr)).unwrap();

        let manager = RoomChannelManager::new();
        let first = manager
            .switch("a", url.clone(), Arc::new(NoopEvents))
            .await
            .unwrap();
        let second = manager.switch("b", url, Arc::new(NoopEvents)).await.unwrap();

        // the old channel's reader is gone, so its outbound queue is closed
        assert!(matches!(
            first.send_text("late").await,
            Err(Error::ChannelClosed)
        ));
        assert!(second.send_text("hello").await.is_ok());
        assert_eq!(
            manager.current().await.map(|c| c.room_id().to_string()),
            Some("b".to_string())
        );

        manager.leave().await;
        assert!(manager.current().await.is_none());
        server.abort();
    }
}
