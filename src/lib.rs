// Flexocks - headless SSH tunnel supervisor

pub mod config;
pub mod crypto;
pub mod service;
pub mod tunnel;

use std::fs::File;
use std::path::Path;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::{KeyringBackend, SupervisorSettings};
use service::FlexocksService;

/// Initialize logging to stderr and, if given, a log file truncated at startup
///
/// Returns the error from creating the log file, if any; stderr logging is
/// installed regardless.
pub fn init_logging(log_file: Option<&Path>) -> Option<std::io::Error> {
    let (file, file_error) = match log_file.map(create_log_file) {
        Some(Ok(file)) => (Some(file), None),
        Some(Err(e)) => (None, Some(e)),
        None => (None, None),
    };

    let file_layer = file.map(|file| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(Mutex::new(file))
    });

    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();

    file_error
}

fn create_log_file(path: &Path) -> std::io::Result<File> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    File::create(path)
}

/// Headless entry point: supervise the tunnel until Ctrl-C
pub fn run() -> ExitCode {
    let log_path = config::log_file().ok();
    if let Some(e) = init_logging(log_path.as_deref()) {
        tracing::warn!("Logging to stderr only, log file unavailable: {}", e);
    }

    tracing::info!("Starting Flexocks {}...", env!("CARGO_PKG_VERSION"));

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to start async runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async {
        match supervise().await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                tracing::error!("Flexocks failed: {}", e);
                ExitCode::FAILURE
            }
        }
    })
}

async fn supervise() -> Result<(), config::StorageError> {
    let settings = SupervisorSettings::load()?;
    tracing::debug!("Settings: {:?}", settings);

    let backend = Arc::new(KeyringBackend::with_service(
        settings.keychain_service.clone(),
    ));
    let mut service = FlexocksService::new(settings, backend).await?;
    tracing::info!("Config file: {:?}", service.store().path());

    let _logger = service.spawn_event_logger();
    service.start_polling();

    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown requested"),
        Err(e) => tracing::error!("Failed to listen for Ctrl-C: {}", e),
    }

    service.shutdown(true).await;
    tracing::info!("Flexocks stopped");
    Ok(())
}
