//! Credential Sealing Module
//!
//! Symmetric AEAD sealing for the stored connection password.

pub mod cipher;
pub mod error;

pub use cipher::{decrypt, encrypt, generate_key, SymmetricKey, KEY_LEN};
pub use error::CryptoError;
