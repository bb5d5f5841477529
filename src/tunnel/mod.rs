//! SSH tunnel supervision
//!
//! Drives the external tunnel script (start/stop/status), tracks the tunnel
//! status, and publishes changes to subscribers.

pub mod controller;
pub mod events;
pub mod poller;
pub mod script;
pub mod status;

pub use controller::{ActionOutcome, ConfigureOutcome, ControllerError, TunnelController};
pub use events::{TunnelEvent, TunnelEventEmitter};
pub use poller::StatusPoller;
pub use script::{ScriptError, ScriptOutput, ShellScript, TunnelParams, TunnelScript};
pub use status::{TunnelAction, TunnelStatus};
