//! Tunnel Controller
//!
//! A single actor task owns the live `Configuration` snapshot and the
//! `TunnelStatus`. Callers talk to it through a cloneable [`TunnelController`]
//! handle. Script runs and keychain access happen on worker tasks; workers
//! only send results back, and the actor is the one that applies them, so
//! every state write happens in one place. Overlapping probes are allowed and
//! the last one to finish wins. Lifecycle commands (configure, reload, start,
//! stop) run one at a time; later ones wait in a queue and see the snapshot
//! left by the one before.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::events::{TunnelEvent, TunnelEventEmitter};
use super::script::{ScriptOutput, TunnelParams, TunnelScript};
use super::status::{TunnelAction, TunnelStatus};
use crate::config::{
    ConfigStore, Configuration, CredentialError, CredentialState, StorageError,
};

const COMMAND_CAPACITY: usize = 32;

/// Controller errors
#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("Tunnel controller is not running")]
    Closed,
}

/// Result of `start`/`stop`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    /// False when the missing-field guard skipped the script entirely
    pub launched: bool,
    /// Script exit code was zero
    pub success: bool,
    pub output: String,
    /// Status after the follow-up probe
    pub status: TunnelStatus,
}

impl ActionOutcome {
    fn skipped(status: TunnelStatus) -> Self {
        Self {
            launched: false,
            success: false,
            output: "Host, local port and remote port are required".to_string(),
            status,
        }
    }
}

/// Result of `configure`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigureOutcome {
    pub changed: bool,
    pub password_changed: bool,
    /// The previous tunnel was stopped before the new configuration took over
    pub stopped_previous: bool,
}

type Reply<T> = oneshot::Sender<T>;

enum ControllerCommand {
    Configure {
        config: Configuration,
        reply: Reply<Result<ConfigureOutcome, ControllerError>>,
    },
    Reload {
        reply: Reply<Result<Configuration, ControllerError>>,
    },
    Run {
        action: TunnelAction,
        reply: Reply<ActionOutcome>,
    },
    CheckStatus {
        reply: Option<Reply<TunnelStatus>>,
    },
    Snapshot {
        reply: Reply<Configuration>,
    },
    Shutdown,
}

/// Sent by workers back to the actor
enum WorkerResult {
    Probe {
        output: ScriptOutput,
        reply: Option<Reply<TunnelStatus>>,
    },
    Configured {
        result: Result<(Configuration, ConfigureOutcome), ControllerError>,
        reply: Reply<Result<ConfigureOutcome, ControllerError>>,
    },
    Reloaded {
        result: Result<Configuration, ControllerError>,
        reply: Reply<Result<Configuration, ControllerError>>,
    },
    ActionDone {
        outcome: ActionOutcome,
        reply: Reply<ActionOutcome>,
    },
}

/// Handle to the tunnel controller actor
#[derive(Clone)]
pub struct TunnelController {
    cmd_tx: mpsc::Sender<ControllerCommand>,
    status_rx: watch::Receiver<TunnelStatus>,
    events: TunnelEventEmitter,
}

impl TunnelController {
    /// Spawn the actor on the current tokio runtime
    pub fn spawn(
        initial: Configuration,
        store: Arc<ConfigStore>,
        script: Arc<dyn TunnelScript>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (result_tx, result_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (status_tx, status_rx) = watch::channel(TunnelStatus::Stopped);
        let events = TunnelEventEmitter::new();

        let actor = ControllerActor {
            config: initial,
            status_tx,
            cmd_rx,
            result_rx,
            lifecycle_busy: false,
            pending: VecDeque::new(),
            worker: Worker {
                store,
                script,
                events: events.clone(),
                result_tx,
            },
        };
        tokio::spawn(actor.run());

        Self {
            cmd_tx,
            status_rx,
            events,
        }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> ControllerCommand,
    ) -> Result<T, ControllerError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(make(tx))
            .await
            .map_err(|_| ControllerError::Closed)?;
        rx.await.map_err(|_| ControllerError::Closed)
    }

    /// Seal the password, persist the configuration and make it live
    ///
    /// If anything changed, a tunnel running on the previous configuration is
    /// stopped first.
    pub async fn configure(
        &self,
        config: Configuration,
    ) -> Result<ConfigureOutcome, ControllerError> {
        self.request(|reply| ControllerCommand::Configure { config, reply })
            .await?
    }

    /// Reload configuration and password from disk and the secret store
    pub async fn reload(&self) -> Result<Configuration, ControllerError> {
        self.request(|reply| ControllerCommand::Reload { reply })
            .await?
    }

    /// Launch the tunnel, then probe its status
    pub async fn start(&self) -> Result<ActionOutcome, ControllerError> {
        self.request(|reply| ControllerCommand::Run {
            action: TunnelAction::Start,
            reply,
        })
        .await
    }

    /// Stop the tunnel, then probe its status
    pub async fn stop(&self) -> Result<ActionOutcome, ControllerError> {
        self.request(|reply| ControllerCommand::Run {
            action: TunnelAction::Stop,
            reply,
        })
        .await
    }

    /// Probe the tunnel and wait for the resulting status
    pub async fn check_status(&self) -> Result<TunnelStatus, ControllerError> {
        self.request(|reply| ControllerCommand::CheckStatus { reply: Some(reply) })
            .await
    }

    /// Queue a probe without waiting for it
    ///
    /// A full queue skips the probe silently; only a stopped controller is an error.
    pub fn request_status_check(&self) -> Result<(), ControllerError> {
        match self
            .cmd_tx
            .try_send(ControllerCommand::CheckStatus { reply: None })
        {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!("Controller queue full, skipping status check");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(ControllerError::Closed),
        }
    }

    /// Current configuration snapshot
    pub async fn configuration(&self) -> Result<Configuration, ControllerError> {
        self.request(|reply| ControllerCommand::Snapshot { reply })
            .await
    }

    /// Last known status
    pub fn status(&self) -> TunnelStatus {
        *self.status_rx.borrow()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<TunnelStatus> {
        self.status_rx.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TunnelEvent> {
        self.events.subscribe()
    }

    /// Stop the actor. In-flight workers finish but their results are dropped.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(ControllerCommand::Shutdown).await;
    }
}

impl std::fmt::Debug for TunnelController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelController")
            .field("status", &self.status())
            .finish()
    }
}

/// Everything a worker task needs
#[derive(Clone)]
struct Worker {
    store: Arc<ConfigStore>,
    script: Arc<dyn TunnelScript>,
    events: TunnelEventEmitter,
    result_tx: mpsc::Sender<WorkerResult>,
}

impl Worker {
    fn report_failure(&self, action: TunnelAction, output: &ScriptOutput) {
        if !output.success {
            tracing::warn!("Tunnel script '{}' failed: {}", action, output.output);
            self.events.emit(TunnelEvent::ScriptFailed {
                action,
                output: output.output.clone(),
            });
        }
    }

    /// Run the status action and have the actor apply the result
    async fn probe(&self, snapshot: &Configuration) -> Option<TunnelStatus> {
        let params = TunnelParams::from_config(snapshot);
        let output = self.script.run(TunnelAction::Status, &params).await;
        self.report_failure(TunnelAction::Status, &output);

        let (tx, rx) = oneshot::channel();
        self.result_tx
            .send(WorkerResult::Probe {
                output,
                reply: Some(tx),
            })
            .await
            .ok()?;
        rx.await.ok()
    }

    /// Recover the password from the secret store off the async threads
    async fn recover_password(&self) -> String {
        let secrets = self.store.secrets().clone();
        match tokio::task::spawn_blocking(move || secrets.recover_password()).await {
            Ok(recovered) => {
                if recovered.state != CredentialState::Available {
                    tracing::warn!(
                        "Password not recovered ({:?}), starting with an empty one",
                        recovered.state
                    );
                }
                recovered.password
            }
            Err(e) => {
                tracing::error!("Password recovery task failed: {}", e);
                String::new()
            }
        }
    }

    /// start/stop followed by a probe
    async fn run_action(&self, action: TunnelAction, snapshot: Configuration) -> ActionOutcome {
        let mut params = TunnelParams::from_config(&snapshot);
        if action == TunnelAction::Start {
            params = params.with_password(self.recover_password().await);
        }

        let output = self.script.run(action, &params).await;
        self.report_failure(action, &output);
        tracing::info!("Tunnel {}: {}", action, params.masked(action));

        let status = match self.probe(&snapshot).await {
            Some(status) => status,
            None => TunnelStatus::Unknown,
        };

        ActionOutcome {
            launched: true,
            success: output.success,
            output: output.output,
            status,
        }
    }

    /// Stop the previous tunnel if needed, persist the file, then seal the password
    ///
    /// The file is written before the keychain so a failed save leaves both
    /// the file and the sealed password as they were.
    async fn configure(
        &self,
        previous: Configuration,
        mut config: Configuration,
    ) -> Result<(Configuration, ConfigureOutcome), ControllerError> {
        let diff = config.diff(&previous);
        let mut outcome = ConfigureOutcome {
            changed: diff.changed,
            password_changed: diff.password_changed,
            stopped_previous: false,
        };

        if diff.changed {
            if previous.has_endpoint() {
                tracing::info!("Configuration changed, stopping tunnel");
                self.run_action(TunnelAction::Stop, previous.clone()).await;
                outcome.stopped_previous = true;
            }
        } else {
            tracing::debug!("Configuration unchanged");
        }

        self.store.save(&config).await?;

        if diff.password_changed {
            let secrets = self.store.secrets().clone();
            let password = config.password.clone();
            tokio::task::spawn_blocking(move || secrets.store_password(&password))
                .await
                .map_err(|e| ControllerError::Task(e.to_string()))??;
            config.credential_state = CredentialState::Available;
        } else {
            config.credential_state = previous.credential_state;
        }

        Ok((config, outcome))
    }
}

struct ControllerActor {
    config: Configuration,
    status_tx: watch::Sender<TunnelStatus>,
    cmd_rx: mpsc::Receiver<ControllerCommand>,
    result_rx: mpsc::Receiver<WorkerResult>,
    /// A configure, reload, start or stop worker is running
    lifecycle_busy: bool,
    pending: VecDeque<ControllerCommand>,
    worker: Worker,
}

impl ControllerActor {
    async fn run(mut self) {
        tracing::info!("Tunnel controller started");
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(ControllerCommand::Shutdown) | None => break,
                    Some(cmd) => self.handle_command(cmd),
                },
                Some(result) = self.result_rx.recv() => self.apply(result),
            }
        }
        tracing::info!("Tunnel controller stopped");
    }

    fn status(&self) -> TunnelStatus {
        *self.status_tx.borrow()
    }

    fn set_status(&mut self, next: TunnelStatus) {
        let previous = self.status_tx.send_replace(next);
        if previous != next {
            tracing::info!("Tunnel status: {} -> {}", previous, next);
            self.worker.events.emit_status_changed(previous, next);
        }
    }

    fn is_lifecycle(cmd: &ControllerCommand) -> bool {
        matches!(
            cmd,
            ControllerCommand::Configure { .. }
                | ControllerCommand::Reload { .. }
                | ControllerCommand::Run { .. }
        )
    }

    /// Lifecycle worker finished; start the next queued command
    fn finish_lifecycle(&mut self) {
        self.lifecycle_busy = false;
        while !self.lifecycle_busy {
            match self.pending.pop_front() {
                Some(cmd) => self.handle_command(cmd),
                None => break,
            }
        }
    }

    fn handle_command(&mut self, cmd: ControllerCommand) {
        if self.lifecycle_busy && Self::is_lifecycle(&cmd) {
            tracing::debug!("Lifecycle command queued ({} pending)", self.pending.len() + 1);
            self.pending.push_back(cmd);
            return;
        }

        match cmd {
            ControllerCommand::Configure { config, reply } => {
                self.lifecycle_busy = true;
                let worker = self.worker.clone();
                let previous = self.config.clone();
                tokio::spawn(async move {
                    let result = worker.configure(previous, config).await;
                    let _ = worker
                        .result_tx
                        .send(WorkerResult::Configured { result, reply })
                        .await;
                });
            }
            ControllerCommand::Reload { reply } => {
                self.lifecycle_busy = true;
                let worker = self.worker.clone();
                tokio::spawn(async move {
                    let result = worker.store.load().await.map_err(ControllerError::from);
                    let _ = worker
                        .result_tx
                        .send(WorkerResult::Reloaded { result, reply })
                        .await;
                });
            }
            ControllerCommand::Run { action, reply } => {
                if !self.config.has_endpoint() {
                    tracing::warn!(
                        "Cannot {} tunnel: host, local port and remote port are required",
                        action
                    );
                    let _ = reply.send(ActionOutcome::skipped(self.status()));
                    return;
                }
                self.lifecycle_busy = true;
                let worker = self.worker.clone();
                let snapshot = self.config.clone();
                tokio::spawn(async move {
                    let outcome = worker.run_action(action, snapshot).await;
                    let _ = worker
                        .result_tx
                        .send(WorkerResult::ActionDone { outcome, reply })
                        .await;
                });
            }
            ControllerCommand::CheckStatus { reply } => {
                if !self.config.has_endpoint() {
                    self.set_status(TunnelStatus::Stopped);
                    if let Some(reply) = reply {
                        let _ = reply.send(TunnelStatus::Stopped);
                    }
                    return;
                }
                let worker = self.worker.clone();
                let snapshot = self.config.clone();
                tokio::spawn(async move {
                    let params = TunnelParams::from_config(&snapshot);
                    tracing::debug!("Checking tunnel status: {}", params.masked(TunnelAction::Status));
                    let output = worker.script.run(TunnelAction::Status, &params).await;
                    worker.report_failure(TunnelAction::Status, &output);
                    let _ = worker
                        .result_tx
                        .send(WorkerResult::Probe { output, reply })
                        .await;
                });
            }
            ControllerCommand::Snapshot { reply } => {
                let _ = reply.send(self.config.clone());
            }
            // Handled in run()
            ControllerCommand::Shutdown => {}
        }
    }

    fn apply(&mut self, result: WorkerResult) {
        match result {
            WorkerResult::Probe { output, reply } => {
                match TunnelStatus::from_probe(&output.stdout) {
                    Some(status) => self.set_status(status),
                    None if output.success => {
                        tracing::warn!(
                            "Unrecognized status output {:?}, keeping {}",
                            output.stdout,
                            self.status()
                        );
                        self.worker.events.emit(TunnelEvent::UnrecognizedStatus {
                            output: output.stdout,
                        });
                    }
                    None => {}
                }
                if let Some(reply) = reply {
                    let _ = reply.send(self.status());
                }
            }
            WorkerResult::Configured { result, reply } => {
                match result {
                    Ok((config, outcome)) => {
                        self.config = config;
                        tracing::info!("Configuration applied: {:?}", self.config);
                        self.worker.events.emit(TunnelEvent::ConfigurationChanged {
                            password_changed: outcome.password_changed,
                        });
                        if outcome.changed {
                            self.handle_command(ControllerCommand::CheckStatus { reply: None });
                        }
                        let _ = reply.send(Ok(outcome));
                    }
                    Err(e) => {
                        tracing::error!("Failed to apply configuration: {}", e);
                        let _ = reply.send(Err(e));
                    }
                }
                self.finish_lifecycle();
            }
            WorkerResult::Reloaded { result, reply } => {
                match result {
                    Ok(config) => {
                        if matches!(
                            config.credential_state,
                            CredentialState::Invalidated | CredentialState::Unavailable
                        ) {
                            self.worker.events.emit(TunnelEvent::CredentialsInvalidated {
                                state: config.credential_state,
                            });
                        }
                        self.config = config;
                        tracing::info!("Configuration reloaded: {:?}", self.config);
                        let _ = reply.send(Ok(self.config.clone()));
                    }
                    Err(e) => {
                        tracing::error!("Failed to reload configuration: {}", e);
                        let _ = reply.send(Err(e));
                    }
                }
                self.finish_lifecycle();
            }
            WorkerResult::ActionDone { outcome, reply } => {
                let _ = reply.send(outcome);
                self.finish_lifecycle();
            }
        }
    }
}
