use super::Monitor;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// Runs N independent monitors concurrently and aggregates their lifecycle.
///
/// Monitors share no mutable state with each other; the only cross-task
/// communication is the stop signal broadcast over a watch channel.
pub struct MonitorSupervisor {
    monitors: Vec<Monitor>,
    handles: Vec<(String, JoinHandle<()>)>,
    stop_tx: watch::Sender<bool>,
}

impl MonitorSupervisor {
    pub fn new() -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            monitors: Vec::new(),
            handles: Vec::new(),
            stop_tx,
        }
    }

    pub fn add(&mut self, monitor: Monitor) {
        self.monitors.push(monitor);
    }

    pub fn is_empty(&self) -> bool {
        self.monitors.is_empty() && self.handles.is_empty()
    }

    /// Launch every registered monitor on its own task.
    pub fn start_all(&mut self) {
        for monitor in self.monitors.drain(..) {
            let name = format!("{}/{}", monitor.app_name(), monitor.service_name());
            info!(monitor = %name, "Starting monitor");

            let stop_rx = self.stop_tx.subscribe();
            self.handles.push((name, tokio::spawn(monitor.run(stop_rx))));
        }
    }

    /// Signal every monitor to stop. Monitors observe the flag cooperatively
    /// at their safe points.
    pub fn stop_all(&self) {
        let _ = self.stop_tx.send(true);
    }

    /// Block until every monitor has observably stopped or the timeout
    /// elapses. A monitor that misses the deadline is abandoned, not killed.
    pub async fn await_all(&mut self, timeout: Duration) {
        let deadline = Instant::now() + timeout;

        for (name, handle) in self.handles.drain(..) {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match tokio::time::timeout(remaining, handle).await {
                Ok(Ok(())) => info!(monitor = %name, "Monitor stopped"),
                Ok(Err(e)) => error!(monitor = %name, error = %e, "Monitor task failed"),
                Err(_) => {
                    warn!(monitor = %name, "Monitor did not stop within timeout, abandoning")
                }
            }
        }
    }
}

impl Default for MonitorSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
