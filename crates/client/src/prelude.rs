//! Re-exports of dependencies that surface in this crate's public API.

pub use async_trait::async_trait;
pub use talka_core;
pub use talka_transport;
pub use tokio_util::sync::CancellationToken;
pub use url;
pub use uuid;
