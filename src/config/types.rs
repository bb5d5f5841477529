//! Connection configuration types
//!
//! `Configuration` is the in-memory form (plaintext password), `ConfigFile`
//! is what lands on disk. The only way to build a `ConfigFile` from a
//! `Configuration` is [`ConfigFile::masked`], which never copies the password.

use serde::{Deserialize, Serialize};

/// Literal written in place of the password on disk
pub const PASSWORD_MASK: &str = "[OCULTA]";

/// Whether the stored password could be recovered from the secret store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialState {
    /// No sealed password has been stored yet
    #[default]
    Unset,
    /// Password recovered (or just supplied by the user)
    Available,
    /// A sealed password exists but can no longer be opened, usually because
    /// the symmetric key was lost or rotated. The user must re-enter it.
    Invalidated,
    /// The secret store itself could not be read
    Unavailable,
}

/// Tunnel connection configuration
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Configuration {
    pub host: String,
    pub local_port: String,
    pub remote_port: String,
    pub username: String,
    /// Plaintext, in memory only
    pub password: String,
    pub credential_state: CredentialState,
}

/// Result of comparing two configurations field by field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigDiff {
    pub changed: bool,
    pub password_changed: bool,
}

impl Configuration {
    pub fn new(
        host: impl Into<String>,
        local_port: impl Into<String>,
        remote_port: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            local_port: local_port.into(),
            remote_port: remote_port.into(),
            username: username.into(),
            password: password.into(),
            credential_state: CredentialState::Available,
        }
    }

    /// Host and both ports are set, so the tunnel script can be invoked
    pub fn has_endpoint(&self) -> bool {
        !self.host.is_empty() && !self.local_port.is_empty() && !self.remote_port.is_empty()
    }

    /// Compare against the previous snapshot
    pub fn diff(&self, previous: &Configuration) -> ConfigDiff {
        let password_changed = self.password != previous.password;
        let changed = password_changed
            || self.host != previous.host
            || self.local_port != previous.local_port
            || self.remote_port != previous.remote_port
            || self.username != previous.username;
        ConfigDiff {
            changed,
            password_changed,
        }
    }
}

impl std::fmt::Debug for Configuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Configuration")
            .field("host", &self.host)
            .field("local_port", &self.local_port)
            .field("remote_port", &self.remote_port)
            .field("username", &self.username)
            .field("password", &PASSWORD_MASK)
            .field("credential_state", &self.credential_state)
            .finish()
    }
}

/// On-disk configuration file (`config.json`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub host: String,
    #[serde(rename = "puertoLocal", default)]
    pub local_port: String,
    #[serde(rename = "puertoRemoto", default)]
    pub remote_port: String,
    #[serde(rename = "usuario", default)]
    pub username: String,
    /// Always [`PASSWORD_MASK`] when written by this crate
    #[serde(rename = "contrasena", default)]
    pub password: String,
}

impl ConfigFile {
    /// Build the persisted form, replacing the password with the mask
    pub fn masked(config: &Configuration) -> Self {
        Self {
            host: config.host.clone(),
            local_port: config.local_port.clone(),
            remote_port: config.remote_port.clone(),
            username: config.username.clone(),
            password: PASSWORD_MASK.to_string(),
        }
    }

    /// Non-secret fields only; the password is recovered separately
    pub fn into_configuration(self) -> Configuration {
        Configuration {
            host: self.host,
            local_port: self.local_port,
            remote_port: self.remote_port,
            username: self.username,
            password: String::new(),
            credential_state: CredentialState::Unset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masked_never_copies_password() {
        let config = Configuration::new("h", "1080", "2222", "u", "secret");
        let file = ConfigFile::masked(&config);
        assert_eq!(file.password, PASSWORD_MASK);

        let json = serde_json::to_string(&file).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("\"puertoLocal\":\"1080\""));
        assert!(json.contains("\"contrasena\":\"[OCULTA]\""));
    }

    #[test]
    fn test_parse_external_format() {
        let json = r#"{"host":"h","puertoLocal":"1080","puertoRemoto":"2222","usuario":"u","contrasena":"[OCULTA]"}"#;
        let file: ConfigFile = serde_json::from_str(json).unwrap();
        let config = file.into_configuration();
        assert_eq!(config.host, "h");
        assert_eq!(config.local_port, "1080");
        assert_eq!(config.remote_port, "2222");
        assert_eq!(config.username, "u");
        assert!(config.password.is_empty());
    }

    #[test]
    fn test_has_endpoint() {
        let mut config = Configuration::new("h", "1080", "2222", "", "");
        assert!(config.has_endpoint());
        config.host.clear();
        assert!(!config.has_endpoint());
        assert!(!Configuration::default().has_endpoint());
    }

    #[test]
    fn test_diff() {
        let old = Configuration::new("h", "1080", "2222", "u", "secret");

        assert_eq!(old.diff(&old), ConfigDiff::default());

        let mut new = old.clone();
        new.username = "other".into();
        assert_eq!(
            new.diff(&old),
            ConfigDiff {
                changed: true,
                password_changed: false
            }
        );

        new.password = "other".into();
        assert!(new.diff(&old).password_changed);
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = Configuration::new("h", "1080", "2222", "u", "hunter2");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains(PASSWORD_MASK));
    }
}
