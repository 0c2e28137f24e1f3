#![warn(missing_docs)]
//! Direct-channel transport for Talka peer-to-peer sessions.
//!
//! The [transport::ConnectionInterface] trait defines how a connection performs the
//! webrtc offer/answer handshake, feeds trickled ICE candidates, and ships data
//! channel payloads to the remote side.
//!
//! The [transport::TransportInterface] trait manages the set of live connections,
//! one per signaling session, and enforces that a session never holds more than
//! one negotiated channel.
//!
//! The [callback::TransportCallback] trait is how the owner observes a connection:
//! inbound payloads, locally gathered candidates, and state changes.

pub mod callback;
pub mod connection;
pub mod connection_ref;
pub mod error;
pub mod ice_server;
pub mod notifier;
pub mod pool;
pub mod transport;

pub use callback::BoxedTransportCallback;
pub use callback::CallbackError;
pub use callback::TransportCallback;
pub use connection::DirectConnection;
pub use connection::DirectTransport;
pub use error::Error;
pub use error::Result;
pub use transport::ConnectionInterface;
pub use transport::ConnectionRole;
pub use transport::IceCandidate;
pub use transport::TransportInterface;
pub use transport::WebrtcConnectionState;
