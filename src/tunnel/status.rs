//! Tunnel status and script actions

use serde::{Deserialize, Serialize};

/// Tri-state tunnel status as reported by the tunnel script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelStatus {
    #[default]
    Stopped,
    Running,
    /// Starting, stopping, or otherwise in between
    Unknown,
}

impl TunnelStatus {
    /// Decode the `status` action output (`"0"`, `"1"` or `"2"`, whitespace allowed)
    ///
    /// Anything else is not a status and yields `None`; callers keep the
    /// previous status in that case.
    pub fn from_probe(output: &str) -> Option<Self> {
        match output.trim() {
            "0" => Some(TunnelStatus::Running),
            "1" => Some(TunnelStatus::Stopped),
            "2" => Some(TunnelStatus::Unknown),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelStatus::Stopped => "stopped",
            TunnelStatus::Running => "running",
            TunnelStatus::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Action token passed as the script's first argument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TunnelAction {
    Start,
    Stop,
    Status,
}

impl TunnelAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelAction::Start => "start",
            TunnelAction::Stop => "stop",
            TunnelAction::Status => "status",
        }
    }

    /// `stop` is invoked without the password flag
    pub fn sends_password(&self) -> bool {
        !matches!(self, TunnelAction::Stop)
    }
}

impl std::fmt::Display for TunnelAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
