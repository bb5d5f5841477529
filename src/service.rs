//! Supervisor service
//!
//! Wires the secret store, config store, script runner and controller once at
//! startup and hands out the controller. Nothing here is global.

use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::config::{
    ConfigStore, Configuration, CredentialState, SecretBackend, SecretStore, StorageError,
    SupervisorSettings,
};
use crate::tunnel::{ShellScript, StatusPoller, TunnelController, TunnelEvent, TunnelScript};

pub struct FlexocksService {
    settings: SupervisorSettings,
    store: Arc<ConfigStore>,
    controller: TunnelController,
    poller: Option<StatusPoller>,
}

impl FlexocksService {
    /// Build the production service: default config path and the shell script runner
    pub async fn new(
        settings: SupervisorSettings,
        backend: Arc<dyn SecretBackend>,
    ) -> Result<Self, StorageError> {
        let secrets = Arc::new(SecretStore::new(backend));
        let store = Arc::new(ConfigStore::new(secrets)?);
        let script_path = settings.script_path()?;
        tracing::info!("Tunnel script: {:?}", script_path);

        let script = Arc::new(ShellScript::new(
            settings.shell.clone(),
            script_path,
            settings.command_timeout(),
        ));
        Ok(Self::with_parts(settings, store, script).await)
    }

    /// Build from explicit parts and load the initial configuration
    ///
    /// A load failure is logged and the service starts with an empty snapshot.
    pub async fn with_parts(
        settings: SupervisorSettings,
        store: Arc<ConfigStore>,
        script: Arc<dyn TunnelScript>,
    ) -> Self {
        let controller = TunnelController::spawn(Configuration::default(), store.clone(), script);

        match controller.reload().await {
            Ok(config) => {
                if matches!(
                    config.credential_state,
                    CredentialState::Invalidated | CredentialState::Unavailable
                ) {
                    tracing::warn!(
                        "Stored password could not be recovered ({:?}), it must be entered again",
                        config.credential_state
                    );
                }
            }
            Err(e) => tracing::error!("Failed to load configuration, starting empty: {}", e),
        }

        Self {
            settings,
            store,
            controller,
            poller: None,
        }
    }

    pub fn controller(&self) -> &TunnelController {
        &self.controller
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Start the status poller if it is not already running
    pub fn start_polling(&mut self) {
        if self.poller.is_none() {
            self.poller = Some(StatusPoller::spawn(
                self.controller.clone(),
                self.settings.poll_interval(),
            ));
        }
    }

    pub fn stop_polling(&mut self) {
        if let Some(mut poller) = self.poller.take() {
            poller.stop();
        }
    }

    /// Log every tunnel event until the controller goes away
    pub fn spawn_event_logger(&self) -> JoinHandle<()> {
        let mut events = self.controller.subscribe_events();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => log_event(&event),
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!("Event logger lagged, {} events skipped", n);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    /// Stop polling, optionally stop the tunnel, then stop the controller
    pub async fn shutdown(mut self, stop_tunnel: bool) {
        self.stop_polling();

        if stop_tunnel {
            match self.controller.stop().await {
                Ok(outcome) if outcome.launched => {
                    tracing::info!("Tunnel stopped on exit ({})", outcome.status)
                }
                Ok(_) => tracing::debug!("No tunnel configured, nothing to stop"),
                Err(e) => tracing::warn!("Failed to stop tunnel on exit: {}", e),
            }
        }

        self.controller.shutdown().await;
    }
}

fn log_event(event: &TunnelEvent) {
    match event {
        TunnelEvent::StatusChanged { previous, current } => {
            tracing::info!("Tunnel {} -> {}", previous, current)
        }
        TunnelEvent::ConfigurationChanged { password_changed } => {
            tracing::info!("Configuration changed (password changed: {})", password_changed)
        }
        TunnelEvent::CredentialsInvalidated { state } => {
            tracing::warn!("Credentials need to be re-entered ({:?})", state)
        }
        TunnelEvent::ScriptFailed { action, output } => {
            tracing::warn!("Tunnel script '{}' failed: {}", action, output)
        }
        TunnelEvent::UnrecognizedStatus { output } => {
            tracing::warn!("Unrecognized tunnel status output: {:?}", output)
        }
    }
}
