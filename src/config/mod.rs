//! Configuration Management Module
//!
//! Handles persistent storage of the tunnel configuration, supervisor
//! settings, and secure credential storage via the system keychain.

pub mod keychain;
pub mod settings;
pub mod storage;
pub mod types;

pub use keychain::{
    CredentialError, KeyringBackend, MemoryBackend, RecoveredPassword, SecretBackend,
    SecretStore, SecretStoreError, KEY_ACCOUNT, PASSWORD_ACCOUNT,
};
pub use settings::SupervisorSettings;
pub use storage::{config_file, data_dir, log_file, ConfigStore, StorageError};
pub use types::{ConfigDiff, ConfigFile, Configuration, CredentialState, PASSWORD_MASK};
