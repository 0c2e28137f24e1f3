//! Tagged wire frames.
//!
//! Everything crossing the room WebSocket or the peer-to-peer data channel is a
//! JSON object with a `type` tag. Frames deserialize into the enums below; a tag
//! this client does not know parses into [ServerFrame::Unknown] and is ignored
//! explicitly by the receiver rather than dropped by a failed parse.

use serde::Deserialize;
use serde::Serialize;

use crate::encoding;

/// One member of a room, as reported by `room_users` snapshots and presence deltas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomMember {
    /// Opaque user id.
    pub user_id: String,
    /// Display name, if the peer shared one.
    #[serde(default)]
    pub user_name: Option<String>,
}

/// Presence delta kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceEvent {
    /// A user joined the room.
    Join,
    /// A user left the room.
    Leave,
}

/// Frames pushed by the server over a room channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A chat message broadcast to the room. `content` carries opaque-encoded text.
    Message {
        /// Server-side message id, used for delete/report calls.
        #[serde(default)]
        id: Option<i64>,
        /// Sender's user id.
        sender_id: String,
        /// Sender's display name.
        #[serde(default)]
        user_name: Option<String>,
        /// Optional avatar reference.
        #[serde(default)]
        avatar: Option<String>,
        /// Opaque-encoded message body.
        #[serde(default)]
        content: Option<String>,
        /// Legacy field name for the body, still sent by older backends.
        #[serde(default)]
        message: Option<String>,
        /// Server timestamp, ISO-8601.
        #[serde(default)]
        timestamp: Option<String>,
        /// Room the message belongs to.
        #[serde(default)]
        room_id: Option<String>,
    },
    /// Full membership snapshot. Replaces local membership state wholesale.
    RoomUsers {
        /// Room the snapshot belongs to.
        #[serde(default)]
        room_id: Option<String>,
        /// Current members.
        users: Vec<RoomMember>,
    },
    /// Incremental membership delta.
    Presence {
        /// Join or leave.
        event: PresenceEvent,
        /// Affected user id.
        user_id: String,
        /// Affected user's display name.
        #[serde(default)]
        user_name: Option<String>,
    },
    /// Any tag this client does not understand.
    #[serde(other)]
    Unknown,
}

/// Frames this client sends over a room channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// A chat message. `content` must already be opaque-encoded.
    Chat {
        /// Opaque-encoded message body.
        content: String,
    },
}

/// Control and payload frames spoken over the peer-to-peer data channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DirectFrame {
    /// Public key announcement, sent once by each side before any chat payload.
    Pubkey {
        /// Base64-encoded X25519 public key.
        data: String,
    },
    /// An encrypted chat payload.
    Msg {
        /// Sealed-box ciphertext, base64-encoded.
        data: String,
        /// Sender's base64-encoded public key, so the receiver can pick the right box.
        #[serde(rename = "fromPublicKey")]
        from_public_key: String,
    },
}

/// A chat message as held in client state. Transient; never persisted client-side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Server-side id, when known.
    pub id: Option<i64>,
    /// Sender's user id.
    pub sender_id: String,
    /// Decoded message text.
    pub text: String,
    /// Sender's display name, defaulting to "Guest".
    pub user_name: String,
    /// Optional avatar reference.
    pub avatar: Option<String>,
    /// Timestamp string as reported by the server, if any.
    pub timestamp: Option<String>,
}

impl ChatMessage {
    /// Build a [ChatMessage] from a `message` frame, decoding the opaque body.
    /// Returns `None` for any other frame kind.
    pub fn from_frame(frame: &ServerFrame) -> Option<Self> {
        let ServerFrame::Message {
            id,
            sender_id,
            user_name,
            avatar,
            content,
            message,
            timestamp,
            ..
        } = frame
        else {
            return None;
        };

        let raw = content.as_deref().or(message.as_deref()).unwrap_or("");
        Some(Self {
            id: *id,
            sender_id: sender_id.clone(),
            text: encoding::opaque_decode(raw),
            user_name: user_name
                .clone()
                .unwrap_or_else(|| "Guest".to_string()),
            avatar: avatar.clone(),
            timestamp: timestamp.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_frame_round_trip() {
        let raw = serde_json::json!({
            "type": "message",
            "id": 7,
            "sender_id": "u1",
            "user_name": "ada",
            "content": encoding::opaque_encode("hello"),
            "timestamp": "2024-01-01 00:00:00",
            "room_id": "general",
        });
        let frame: ServerFrame = serde_json::from_value(raw).unwrap();
        let msg = ChatMessage::from_frame(&frame).unwrap();
        assert_eq!(msg.text, "hello");
        assert_eq!(msg.user_name, "ada");
        assert_eq!(msg.id, Some(7));
    }

    #[test]
    fn test_legacy_message_field() {
        let raw = serde_json::json!({
            "type": "message",
            "sender_id": "u1",
            "message": encoding::opaque_encode("old style"),
        });
        let frame: ServerFrame = serde_json::from_value(raw).unwrap();
        let msg = ChatMessage::from_frame(&frame).unwrap();
        assert_eq!(msg.text, "old style");
        assert_eq!(msg.user_name, "Guest");
    }

    #[test]
    fn test_room_users_snapshot() {
        let raw = r#"{"type":"room_users","room_id":"r1","users":[{"user_id":"a","user_name":"A"},{"user_id":"b"}]}"#;
        let frame: ServerFrame = serde_json::from_str(raw).unwrap();
        let ServerFrame::RoomUsers { users, .. } = frame else {
            panic!("wrong variant");
        };
        assert_eq!(users.len(), 2);
        assert_eq!(users[1].user_name, None);
    }

    #[test]
    fn test_presence_events() {
        let join: ServerFrame =
            serde_json::from_str(r#"{"type":"presence","event":"join","user_id":"a"}"#).unwrap();
        assert!(matches!(
            join,
            ServerFrame::Presence {
                event: PresenceEvent::Join,
                ..
            }
        ));
        let leave: ServerFrame =
            serde_json::from_str(r#"{"type":"presence","event":"leave","user_id":"a"}"#).unwrap();
        assert!(matches!(
            leave,
            ServerFrame::Presence {
                event: PresenceEvent::Leave,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_tag_is_explicit() {
        let frame: ServerFrame =
            serde_json::from_str(r#"{"type":"typing_indicator","user_id":"a"}"#).unwrap();
        assert!(matches!(frame, ServerFrame::Unknown));
    }

    #[test]
    fn test_chat_frame_shape() {
        let out = serde_json::to_value(ClientFrame::Chat {
            content: "aGk=".to_string(),
        })
        .unwrap();
        assert_eq!(out, serde_json::json!({"type": "chat", "content": "aGk="}));
    }

    #[test]
    fn test_direct_frame_field_names() {
        let out = serde_json::to_value(DirectFrame::Msg {
            data: "ct".to_string(),
            from_public_key: "pk".to_string(),
        })
        .unwrap();
        assert_eq!(
            out,
            serde_json::json!({"type": "msg", "data": "ct", "fromPublicKey": "pk"})
        );
        let pubkey: DirectFrame =
            serde_json::from_str(r#"{"type":"pubkey","data":"cGs="}"#).unwrap();
        assert!(matches!(pubkey, DirectFrame::Pubkey { .. }));
    }
}
