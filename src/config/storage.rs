//! Configuration Storage
//!
//! Handles reading/writing the connection configuration to disk.
//! Data location: `<config dir>/Flexocks` (Application Support on macOS),
//! `~/.flexocks` as fallback, or `$FLEXOCKS_HOME` when set.
//!
//! The JSON file only ever holds non-secret fields. The password lives in the
//! secret store as a sealed blob and is recovered on every load.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;
use tokio::io::AsyncWriteExt;

use super::keychain::SecretStore;
use super::types::{ConfigFile, Configuration};

/// Environment variable overriding the data directory
pub const HOME_ENV: &str = "FLEXOCKS_HOME";

/// Configuration storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Failed to determine config directory")]
    NoConfigDir,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Get the Flexocks data directory
pub fn data_dir() -> Result<PathBuf, StorageError> {
    if let Some(home) = std::env::var_os(HOME_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(home));
    }

    if let Some(config) = dirs::config_dir() {
        return Ok(config.join("Flexocks"));
    }

    dirs::home_dir()
        .map(|home| home.join(".flexocks"))
        .ok_or(StorageError::NoConfigDir)
}

/// Get the connection configuration file path
pub fn config_file() -> Result<PathBuf, StorageError> {
    Ok(data_dir()?.join("config.json"))
}

/// Get the diagnostic log file path
pub fn log_file() -> Result<PathBuf, StorageError> {
    Ok(data_dir()?.join("flexocks.log"))
}

/// Configuration storage manager
pub struct ConfigStore {
    path: PathBuf,
    secrets: Arc<SecretStore>,
}

impl ConfigStore {
    /// Create a new storage manager with default path
    pub fn new(secrets: Arc<SecretStore>) -> Result<Self, StorageError> {
        Ok(Self {
            path: config_file()?,
            secrets,
        })
    }

    /// Create storage manager with custom path (for testing)
    pub fn with_path(path: PathBuf, secrets: Arc<SecretStore>) -> Self {
        Self { path, secrets }
    }

    /// Ensure the data directory exists
    async fn ensure_dir(&self) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Load configuration from disk and recover the password
    ///
    /// A missing file is bootstrapped with an all-empty configuration. A
    /// corrupted file is backed up and reported as `StorageError::Json`.
    /// Credential failures never abort the load: the password degrades to
    /// empty and `credential_state` records why.
    pub async fn load(&self) -> Result<Configuration, StorageError> {
        let contents = match fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {:?}, creating an empty one", self.path);
                let empty = Configuration::default();
                self.save(&empty).await?;
                return Ok(empty);
            }
            Err(e) => return Err(StorageError::Io(e)),
        };

        let file = match serde_json::from_str::<ConfigFile>(&contents) {
            Ok(file) => file,
            Err(e) => {
                tracing::warn!("Config file corrupted: {}", e);
                match self.backup().await {
                    Ok(backup_path) => {
                        tracing::warn!("Corrupted config backed up to {:?}", backup_path)
                    }
                    Err(backup_err) => {
                        tracing::error!("Failed to backup corrupted config: {}", backup_err)
                    }
                }
                return Err(StorageError::Json(e));
            }
        };

        let mut config = file.into_configuration();
        let recovered = self.secrets.recover_password();
        config.password = recovered.password;
        config.credential_state = recovered.state;

        tracing::debug!("Configuration loaded: {:?}", config);
        Ok(config)
    }

    /// Save configuration to disk with the password masked
    pub async fn save(&self, config: &Configuration) -> Result<(), StorageError> {
        self.ensure_dir().await?;

        // Write to temp file first, then rename (atomic write)
        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&ConfigFile::masked(config))?;

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(json.as_bytes()).await?;
        file.sync_all().await?;

        fs::rename(&temp_path, &self.path).await?;

        tracing::debug!("Configuration saved to {:?}", self.path);
        Ok(())
    }

    /// Check if config file exists
    pub async fn exists(&self) -> bool {
        fs::metadata(&self.path).await.is_ok()
    }

    /// Get config file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Secret store used to recover the password
    pub fn secrets(&self) -> &Arc<SecretStore> {
        &self.secrets
    }

    /// Copy the current config file aside with a timestamp suffix
    pub async fn backup(&self) -> Result<PathBuf, StorageError> {
        let backup_path = self.path.with_extension(format!(
            "json.backup.{}",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        ));

        if self.exists().await {
            fs::copy(&self.path, &backup_path).await?;
        }

        Ok(backup_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::keychain::{MemoryBackend, KEY_ACCOUNT};
    use crate::config::types::{CredentialState, PASSWORD_MASK};
    use tempfile::tempdir;

    fn store_at(path: PathBuf) -> ConfigStore {
        ConfigStore::with_path(path, Arc::new(SecretStore::in_memory()))
    }

    #[tokio::test]
    async fn test_load_bootstraps_missing_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("nested").join("config.json");
        let storage = store_at(path.clone());

        let config = storage.load().await.unwrap();
        assert_eq!(config, Configuration::default());
        assert!(storage.exists().await);

        let on_disk: ConfigFile =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(on_disk.host.is_empty());
        assert!(on_disk.local_port.is_empty());
        assert!(on_disk.remote_port.is_empty());
        assert!(on_disk.username.is_empty());
        assert_eq!(on_disk.password, PASSWORD_MASK);
    }

    #[tokio::test]
    async fn test_save_never_writes_password() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        let storage = store_at(path.clone());

        let config = Configuration::new("h", "1080", "2222", "u", "s3cr3t-Passw0rd");
        storage.save(&config).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("s3cr3t-Passw0rd"));
        assert!(raw.contains(PASSWORD_MASK));
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[tokio::test]
    async fn test_save_and_load_recovers_password() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        let secrets = Arc::new(SecretStore::in_memory());
        let storage = ConfigStore::with_path(path, secrets.clone());

        secrets.store_password("secret").unwrap();
        storage
            .save(&Configuration::new("h", "1080", "2222", "u", "secret"))
            .await
            .unwrap();

        let loaded = storage.load().await.unwrap();
        assert_eq!(loaded.host, "h");
        assert_eq!(loaded.username, "u");
        assert_eq!(loaded.password, "secret");
        assert_eq!(loaded.credential_state, CredentialState::Available);
    }

    #[tokio::test]
    async fn test_load_degrades_on_lost_key() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        let backend = Arc::new(MemoryBackend::new());
        let secrets = Arc::new(SecretStore::new(backend.clone()));
        let storage = ConfigStore::with_path(path, secrets.clone());

        secrets.store_password("secret").unwrap();
        storage
            .save(&Configuration::new("h", "1080", "2222", "u", "secret"))
            .await
            .unwrap();
        secrets.delete_secret(KEY_ACCOUNT).unwrap();

        let loaded = storage.load().await.unwrap();
        assert_eq!(loaded.host, "h");
        assert!(loaded.password.is_empty());
        assert_eq!(loaded.credential_state, CredentialState::Invalidated);
    }

    #[tokio::test]
    async fn test_corrupted_file_is_backed_up() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        let storage = store_at(path.clone());

        let result = storage.load().await;
        assert!(matches!(result, Err(StorageError::Json(_))));

        let backups: Vec<_> = std::fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".backup."))
            .collect();
        assert_eq!(backups.len(), 1);
        // Original is left in place
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
    }
}
