//! Tunnel Event System
//!
//! Status and configuration changes are published on a broadcast channel.
//! Front ends subscribe instead of observing controller state directly.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::status::{TunnelAction, TunnelStatus};
use crate::config::CredentialState;

const EVENT_CAPACITY: usize = 64;

/// Events emitted by the tunnel controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TunnelEvent {
    StatusChanged {
        previous: TunnelStatus,
        current: TunnelStatus,
    },
    /// A new configuration was saved and is now live
    ConfigurationChanged { password_changed: bool },
    /// The stored password could not be recovered; the user must re-enter it
    CredentialsInvalidated { state: CredentialState },
    /// The script ran but exited non-zero, or could not be run at all
    ScriptFailed {
        action: TunnelAction,
        output: String,
    },
    /// The status probe printed something other than a status code
    UnrecognizedStatus { output: String },
}

/// Broadcast emitter for tunnel events
#[derive(Clone)]
pub struct TunnelEventEmitter {
    tx: broadcast::Sender<TunnelEvent>,
}

impl TunnelEventEmitter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TunnelEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; having no subscribers is fine
    pub fn emit(&self, event: TunnelEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Tunnel event dropped, no subscribers");
        }
    }

    pub fn emit_status_changed(&self, previous: TunnelStatus, current: TunnelStatus) {
        self.emit(TunnelEvent::StatusChanged { previous, current });
    }
}

impl Default for TunnelEventEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TunnelEventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelEventEmitter")
            .field("subscribers", &self.tx.receiver_count())
            .finish()
    }
}
