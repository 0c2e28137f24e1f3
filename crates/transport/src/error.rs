#![allow(missing_docs)]

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum IceServerError {
    #[error("Url parse error")]
    UrlParse(#[from] url::ParseError),

    #[error("Ice server scheme {0} has not supported yet")]
    SchemeNotSupported(String),

    #[error("Cannot extract host from url")]
    UrlMissHost,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("WebRTC error: {0}")]
    Webrtc(#[from] webrtc::error::Error),

    #[error("IceServer error: {0}")]
    IceServer(#[from] IceServerError),

    #[error("Failed when waiting for data channel open: {0}")]
    DataChannelOpen(String),

    #[error("No data channel attached to this connection yet")]
    DataChannelMissing,

    #[error("Connection {0} already exists")]
    ConnectionAlreadyExists(String),

    #[error("Connection {0} not found, should handshake first")]
    ConnectionNotFound(String),

    #[error("Connection {0} is released")]
    ConnectionReleased(String),
}
