#![warn(missing_docs)]
//! # Talka Core
//!
//! Data model shared by the Talka chat client crates: the identity context that is
//! threaded through every backend call, the tagged wire frames spoken over the room
//! WebSocket and the peer-to-peer data channel, the opaque text encoding applied to
//! room messages, and the session-scoped sealed-box encryption layer used once a
//! direct channel is open.

pub mod encoding;
pub mod error;
pub mod filetag;
pub mod frame;
pub mod identity;
pub mod sealed;

pub use error::Error;
pub use error::Result;
pub use filetag::FileTag;
pub use frame::ChatMessage;
pub use frame::ClientFrame;
pub use frame::DirectFrame;
pub use frame::PresenceEvent;
pub use frame::RoomMember;
pub use frame::ServerFrame;
pub use identity::Identity;
