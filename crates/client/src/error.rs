//! A bunch of wrap errors.

/// A wrap `Result` contains custom errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors enum mapping global custom errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Authentication failed: {0}")]
    Authentication(String),
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error("Server returned status {0}: {1}")]
    HttpStatus(u16, String),
    #[error("Http request error: {0}")]
    HttpRequestError(#[from] reqwest::Error),
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Room channel is closed")]
    ChannelClosed,
    #[error("No room joined")]
    NoRoomJoined,
    #[error("Url parse error: {0}")]
    UrlParse(#[from] url::ParseError),
    #[error("Invalid session transition from {from} to {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
    #[error("Session {0} not found")]
    SessionNotFound(String),
    #[error("Session {0} is closed")]
    SessionClosed(String),
    #[error("Operation on session {0} was cancelled")]
    Cancelled(String),
    #[error("Session {0} abandoned after repeated poll failures")]
    PollBudgetExhausted(String),
    #[error("Peer public key not received yet")]
    PeerKeyMissing,
    #[error("Core error: {0}")]
    CoreError(#[from] talka_core::Error),
    #[error("Transport error: {0}")]
    TransportError(#[from] talka_transport::Error),
    #[error("Serde json error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
    #[error("Serde yaml error: {0}")]
    SerdeYamlError(#[from] serde_yaml::Error),
    #[error("Create file error: {0}")]
    CreateFileError(String),
    #[error("Open file error: {0}")]
    OpenFileError(String),
    #[error("Cannot find home directory")]
    HomeDirError,
    #[error("Cannot find parent directory")]
    ParentDirError,
    #[error("Invalid logging level: {0}")]
    InvalidLoggingLevel(String),
}
