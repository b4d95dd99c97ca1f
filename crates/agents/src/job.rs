//! Units of recurring background work.

use retention_analytics::{BatchWriter, DailyVisitDeriver};
use retention_core::{Clock, RetentionResult};
use retention_reporting::StatsCollector;
use std::sync::Arc;
use tracing::info;

/// Work a [`RecurringTimer`](crate::timer::RecurringTimer) runs on every tick.
///
/// Jobs must be idempotent: a tick may be repeated, skipped, or run one last
/// time during shutdown.
pub trait PeriodicJob: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn run(&self) -> RetentionResult<()>;
}

impl PeriodicJob for BatchWriter {
    fn name(&self) -> &'static str {
        "batch_flush"
    }

    /// Per-key failures stay queued inside the writer, so a flush never fails as a whole.
    fn run(&self) -> RetentionResult<()> {
        self.flush();
        Ok(())
    }
}

impl PeriodicJob for DailyVisitDeriver {
    fn name(&self) -> &'static str {
        "daily_visits"
    }

    fn run(&self) -> RetentionResult<()> {
        self.derive().map(|_| ())
    }
}

/// Logs the flattened stats payload. Shipping it anywhere is left to the
/// consumer of the log stream.
pub struct StatsReportJob {
    collector: Arc<StatsCollector>,
    clock: Arc<dyn Clock>,
}

impl StatsReportJob {
    pub fn new(collector: Arc<StatsCollector>, clock: Arc<dyn Clock>) -> Self {
        Self { collector, clock }
    }
}

impl PeriodicJob for StatsReportJob {
    fn name(&self) -> &'static str {
        "stats_report"
    }

    fn run(&self) -> RetentionResult<()> {
        let stats = self.collector.collect(self.clock.now())?;
        let payload = serde_json::to_string(&stats.to_payload())?;
        info!(payload = %payload, "Retention stats");
        Ok(())
    }
}
