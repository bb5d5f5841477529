//! Keychain Integration
//!
//! Holds the symmetric key and the sealed connection password in the
//! platform secret store. The `keyring` crate provides the OS vault
//! (macOS Keychain, Secret Service, Windows Credential Manager); an
//! in-memory backend exists for tests and ephemeral runs.

use std::collections::HashMap;
use std::sync::Arc;

use keyring::Entry;
use parking_lot::Mutex;

use super::types::CredentialState;
use crate::crypto::{self, CryptoError, SymmetricKey, KEY_LEN};

/// Default service name for keychain entries
pub const SERVICE_NAME: &str = "com.flexocks.tunnel";

/// Account holding the raw symmetric key bytes
pub const KEY_ACCOUNT: &str = "com.Flexocks.claveSimetrica";

/// Account holding the base64 sealed connection password
pub const PASSWORD_ACCOUNT: &str = "com.Flexocks.PasswordConexion";

/// Secret store errors
#[derive(Debug, thiserror::Error)]
pub enum SecretStoreError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Secret for account {0} did not read back as written")]
    Verification(String),
}

/// Failure while sealing or storing the connection password
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error(transparent)]
    Store(#[from] SecretStoreError),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// A generic-password vault addressed by account name
pub trait SecretBackend: Send + Sync {
    /// Read the secret for `account`; `Ok(None)` when no entry exists
    fn read(&self, account: &str) -> Result<Option<Vec<u8>>, SecretStoreError>;

    /// Create or overwrite the secret for `account`
    fn write(&self, account: &str, secret: &[u8]) -> Result<(), SecretStoreError>;

    /// Remove the secret for `account`; removing a missing entry is not an error
    fn delete(&self, account: &str) -> Result<(), SecretStoreError>;
}

/// OS keychain backend
pub struct KeyringBackend {
    service: String,
}

impl KeyringBackend {
    pub fn new() -> Self {
        Self::with_service(SERVICE_NAME)
    }

    /// Create with custom service name (for testing)
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, account: &str) -> Result<Entry, SecretStoreError> {
        Ok(Entry::new(&self.service, account)?)
    }
}

impl Default for KeyringBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SecretBackend for KeyringBackend {
    fn read(&self, account: &str) -> Result<Option<Vec<u8>>, SecretStoreError> {
        match self.entry(account)?.get_secret() {
            Ok(secret) => Ok(Some(secret)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(SecretStoreError::Keyring(e)),
        }
    }

    fn write(&self, account: &str, secret: &[u8]) -> Result<(), SecretStoreError> {
        // keyring creates the item or updates it in place if it already exists
        self.entry(account)?.set_secret(secret)?;
        Ok(())
    }

    fn delete(&self, account: &str) -> Result<(), SecretStoreError> {
        match self.entry(account)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(SecretStoreError::Keyring(e)),
        }
    }
}

/// In-process backend, nothing survives the process
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretBackend for MemoryBackend {
    fn read(&self, account: &str) -> Result<Option<Vec<u8>>, SecretStoreError> {
        Ok(self.entries.lock().get(account).cloned())
    }

    fn write(&self, account: &str, secret: &[u8]) -> Result<(), SecretStoreError> {
        self.entries
            .lock()
            .insert(account.to_string(), secret.to_vec());
        Ok(())
    }

    fn delete(&self, account: &str) -> Result<(), SecretStoreError> {
        self.entries.lock().remove(account);
        Ok(())
    }
}

/// Password recovered from the secret store, with how it went
#[derive(Clone, PartialEq, Eq)]
pub struct RecoveredPassword {
    pub password: String,
    pub state: CredentialState,
}

impl RecoveredPassword {
    fn degraded(state: CredentialState) -> Self {
        Self {
            password: String::new(),
            state,
        }
    }
}

impl std::fmt::Debug for RecoveredPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveredPassword")
            .field("len", &self.password.len())
            .field("state", &self.state)
            .finish()
    }
}

/// Secret store for the tunnel credentials
pub struct SecretStore {
    backend: Arc<dyn SecretBackend>,
}

impl SecretStore {
    pub fn new(backend: Arc<dyn SecretBackend>) -> Self {
        Self { backend }
    }

    /// Store backed by a fresh [`MemoryBackend`]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryBackend::new()))
    }

    /// Look up a secret; a missing entry is `Ok(None)`
    pub fn read_secret(&self, account: &str) -> Result<Option<Vec<u8>>, SecretStoreError> {
        self.backend.read(account)
    }

    /// Upsert a secret and verify it reads back identically
    pub fn write_secret(&self, account: &str, secret: &[u8]) -> Result<(), SecretStoreError> {
        tracing::debug!("Secret store write: account={}", account);
        self.backend.write(account, secret)?;

        match self.backend.read(account)? {
            Some(read_back) if read_back == secret => Ok(()),
            _ => {
                tracing::error!("Secret store verification failed: account={}", account);
                Err(SecretStoreError::Verification(account.to_string()))
            }
        }
    }

    pub fn delete_secret(&self, account: &str) -> Result<(), SecretStoreError> {
        tracing::debug!("Secret store delete: account={}", account);
        self.backend.delete(account)
    }

    /// Return the stored symmetric key, provisioning one if none is usable
    ///
    /// A missing or wrong-length entry is replaced by a freshly generated key.
    /// A backend read failure is returned as an error instead, so a key that
    /// merely could not be read is never overwritten.
    pub fn get_or_create_symmetric_key(&self) -> Result<SymmetricKey, SecretStoreError> {
        match self.read_secret(KEY_ACCOUNT)? {
            Some(bytes) => match SymmetricKey::from_bytes(&bytes) {
                Ok(key) => return Ok(key),
                Err(e) => {
                    tracing::warn!("Stored symmetric key is unusable ({}), regenerating", e);
                }
            },
            None => {
                tracing::info!("No symmetric key in secret store, generating one");
            }
        }

        let key = crypto::generate_key();
        self.write_secret(KEY_ACCOUNT, key.as_bytes())?;
        tracing::info!("Symmetric key stored ({} bytes)", KEY_LEN);
        Ok(key)
    }

    /// Seal `password` under the stored key and persist the blob
    pub fn store_password(&self, password: &str) -> Result<(), CredentialError> {
        let key = self.get_or_create_symmetric_key()?;
        let sealed = crypto::encrypt(password, &key)?;
        self.write_secret(PASSWORD_ACCOUNT, sealed.as_bytes())?;
        tracing::info!("Sealed password saved to secret store");
        Ok(())
    }

    /// Recover the plaintext password, degrading to empty on any failure
    pub fn recover_password(&self) -> RecoveredPassword {
        let blob = match self.read_secret(PASSWORD_ACCOUNT) {
            Ok(Some(blob)) => blob,
            Ok(None) => {
                tracing::debug!("No sealed password in secret store");
                return RecoveredPassword::degraded(CredentialState::Unset);
            }
            Err(e) => {
                tracing::warn!("Failed to read sealed password: {}", e);
                return RecoveredPassword::degraded(CredentialState::Unavailable);
            }
        };

        let sealed = match String::from_utf8(blob) {
            Ok(sealed) => sealed,
            Err(_) => {
                tracing::warn!("Sealed password is not valid UTF-8, credentials invalidated");
                return RecoveredPassword::degraded(CredentialState::Invalidated);
            }
        };

        let key = match self.get_or_create_symmetric_key() {
            Ok(key) => key,
            Err(e) => {
                tracing::warn!("Symmetric key unavailable: {}", e);
                return RecoveredPassword::degraded(CredentialState::Unavailable);
            }
        };

        match crypto::decrypt(&sealed, &key) {
            Ok(password) => RecoveredPassword {
                password,
                state: CredentialState::Available,
            },
            Err(e) => {
                tracing::warn!("Failed to open sealed password ({}), credentials invalidated", e);
                RecoveredPassword::degraded(CredentialState::Invalidated)
            }
        }
    }
}
