//! Supervisor settings
//!
//! Optional `settings.json` next to `config.json`. Every field has a default,
//! so a partial file (or none at all) is fine.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::keychain::SERVICE_NAME;
use super::storage::{data_dir, StorageError};

/// Environment variable overriding the tunnel script path
pub const SCRIPT_ENV: &str = "FLEXOCKS_SCRIPT";

const DEFAULT_SHELL: &str = "/bin/bash";
const DEFAULT_SCRIPT_NAME: &str = "flexocks.sh";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorSettings {
    /// Tunnel script; `None` resolves to `<data dir>/flexocks.sh`
    pub script_path: Option<PathBuf>,
    /// Interpreter the script is run with
    pub shell: PathBuf,
    pub poll_interval_secs: u64,
    /// Hard limit per script invocation; the process is killed past it
    pub command_timeout_secs: u64,
    pub keychain_service: String,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            script_path: None,
            shell: PathBuf::from(DEFAULT_SHELL),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            keychain_service: SERVICE_NAME.to_string(),
        }
    }
}

impl SupervisorSettings {
    /// Load from `<data dir>/settings.json`, then apply environment overrides
    pub fn load() -> Result<Self, StorageError> {
        let path = data_dir()?.join("settings.json");
        let mut settings = Self::load_from(&path);
        if let Some(script) = std::env::var_os(SCRIPT_ENV).filter(|v| !v.is_empty()) {
            settings.script_path = Some(PathBuf::from(script));
        }
        Ok(settings)
    }

    /// Read a settings file, falling back to defaults if missing or malformed
    pub fn load_from(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                tracing::warn!("Failed to read settings {:?}: {}, using defaults", path, e);
                return Self::default();
            }
        };

        serde_json::from_str(&contents).unwrap_or_else(|e| {
            tracing::warn!("Malformed settings {:?}: {}, using defaults", path, e);
            Self::default()
        })
    }

    /// Resolved tunnel script path
    pub fn script_path(&self) -> Result<PathBuf, StorageError> {
        match &self.script_path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join(DEFAULT_SCRIPT_NAME)),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        // A zero period would make tokio's interval panic
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs.max(1))
    }
}
