//! Periodic status polling
//!
//! Asks the controller for a status probe on a fixed interval. Probes are
//! fire-and-forget: a slow script never delays the next tick.

use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::controller::TunnelController;

/// Background status poller; stops when dropped
pub struct StatusPoller {
    stop_tx: Option<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

impl StatusPoller {
    /// Start polling. The first probe is requested immediately.
    pub fn spawn(controller: TunnelController, period: Duration) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(poll_loop(controller, period, stop_rx));
        Self {
            stop_tx: Some(stop_tx),
            handle,
        }
    }

    /// Stop polling. Probes already requested still complete.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.stop();
        self.handle.abort();
    }
}

async fn poll_loop(
    controller: TunnelController,
    period: Duration,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::debug!("Status poller started ({}s)", period.as_secs_f32());

    loop {
        tokio::select! {
            _ = &mut stop_rx => break,
            _ = interval.tick() => {
                if controller.request_status_check().is_err() {
                    tracing::debug!("Controller gone, stopping status poller");
                    break;
                }
            }
        }
    }

    tracing::debug!("Status poller stopped");
}
