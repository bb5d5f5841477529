//! Error types for credential sealing

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Failed to seal plaintext")]
    Encode,

    #[error("Malformed sealed credential: {0}")]
    Decode(String),

    #[error("Authentication failed (wrong key or corrupted data)")]
    Authentication,

    #[error("Invalid key length: expected {expected} bytes, got {found}")]
    InvalidKeyLength { expected: usize, found: usize },
}

impl From<base64::DecodeError> for CryptoError {
    fn from(e: base64::DecodeError) -> Self {
        CryptoError::Decode(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for CryptoError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        CryptoError::Decode(e.to_string())
    }
}
