//! Cancellable recurring timer.

use crate::job::PeriodicJob;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runs a [`PeriodicJob`] every `period` on the tokio runtime until stopped.
///
/// The first run happens one full period after start. Stopping is idempotent
/// and waits for an in-flight run to finish.
pub struct RecurringTimer {
    name: &'static str,
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl RecurringTimer {
    /// Spawn the timer. Must be called from within a tokio runtime.
    pub fn start(job: Arc<dyn PeriodicJob>, period: Duration) -> Self {
        let name = job.name();
        let token = CancellationToken::new();
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            interval.tick().await;

            info!(job = name, period_ms = period.as_millis() as u64, "Recurring job started");
            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = interval.tick() => {
                        debug!(job = name, "Running recurring job");
                        if let Err(e) = job.run() {
                            warn!(job = name, error = %e, "Recurring job failed, retrying next tick");
                        }
                    }
                }
            }
            info!(job = name, "Recurring job stopped");
        });

        Self {
            name,
            token,
            handle: Mutex::new(Some(handle)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Signal the timer to stop without waiting for it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel and wait for the task to exit. Safe to call more than once.
    pub async fn stop(&self) {
        self.cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(job = self.name, error = %e, "Recurring job task panicked");
            }
        }
    }
}

impl Drop for RecurringTimer {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
