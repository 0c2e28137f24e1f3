#![allow(missing_docs)]

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Ciphertext failed authentication or keys mismatch")]
    Authentication,

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Ciphertext too short to carry a nonce")]
    CiphertextTooShort,

    #[error("Base64 decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Payload is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Frame decode error: {0}")]
    FrameDecode(#[from] serde_json::Error),

    #[error("Malformed file tag: {0}")]
    MalformedFileTag(String),
}
