//! Password sealing with ChaCha20-Poly1305
//!
//! A sealed credential is `base64(nonce || ciphertext || tag)`, so the blob is
//! self-describing and can be stored as an opaque string in the secret store.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, KeyInit, Nonce};
use rand::RngCore;
use zeroize::Zeroizing;

use super::error::CryptoError;

/// Symmetric key length in bytes (256 bits)
pub const KEY_LEN: usize = 32;
/// Nonce length in bytes (96 bits)
pub const NONCE_LEN: usize = 12;
/// Poly1305 tag length in bytes
pub const TAG_LEN: usize = 16;

/// 256-bit symmetric key, wiped from memory on drop
#[derive(Clone)]
pub struct SymmetricKey(Zeroizing<[u8; KEY_LEN]>);

impl SymmetricKey {
    /// Rebuild a key from raw bytes read back from the secret store
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::InvalidKeyLength {
                expected: KEY_LEN,
                found: bytes.len(),
            });
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Raw key material, for persisting into the secret store
    pub fn as_bytes(&self) -> &[u8] {
        &self.0[..]
    }
}

impl PartialEq for SymmetricKey {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for SymmetricKey {}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

/// Generate a fresh key from the OS CSPRNG
pub fn generate_key() -> SymmetricKey {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    rand::rngs::OsRng.fill_bytes(&mut key[..]);
    SymmetricKey(key)
}

/// Seal `plaintext` under `key` with a fresh random nonce
pub fn encrypt(plaintext: &str, key: &SymmetricKey) -> Result<String, CryptoError> {
    let cipher =
        ChaCha20Poly1305::new_from_slice(key.as_bytes()).map_err(|_| CryptoError::Encode)?;

    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    // ChaCha20Poly1305 appends the 16-byte tag to the ciphertext
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
        .map_err(|_| CryptoError::Encode)?;

    let mut combined = Vec::with_capacity(NONCE_LEN + sealed.len());
    combined.extend_from_slice(&nonce);
    combined.extend_from_slice(&sealed);

    Ok(STANDARD.encode(combined))
}

/// Open a sealed credential produced by [`encrypt`]
///
/// Fails on malformed base64, truncated blobs and tag mismatch. There is no
/// partial recovery: either the full plaintext authenticates or nothing is returned.
pub fn decrypt(sealed_b64: &str, key: &SymmetricKey) -> Result<String, CryptoError> {
    let combined = STANDARD.decode(sealed_b64.trim())?;
    if combined.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::Decode(format!(
            "sealed credential too short ({} bytes)",
            combined.len()
        )));
    }

    let (nonce, sealed) = combined.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new_from_slice(key.as_bytes())
        .map_err(|_| CryptoError::Authentication)?;

    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| CryptoError::Authentication)?;

    Ok(String::from_utf8(plaintext)?)
}
