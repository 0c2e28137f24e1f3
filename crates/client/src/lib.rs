//! Talka chat client.
//!
//! Room chat rides a WebSocket to the backend; direct one-to-one sessions are
//! negotiated through the backend's signaling relay and then leave it entirely,
//! speaking sealed-box encrypted frames over a webrtc data channel.
//!
//! The [processor::Processor] is the entry point; the `talka` binary in this
//! crate is a thin CLI over it.

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod processor;
pub mod room;
pub mod session;
pub mod signaling;
pub mod util;

pub use error::Error;
pub use error::Result;
pub use processor::Processor;
pub use processor::ProcessorBuilder;
pub use processor::ProcessorConfig;
