//! Pipeline manager: owns the recurring jobs of one node.

use crate::job::{PeriodicJob, StatsReportJob};
use crate::pipeline::RetentionPipeline;
use crate::timer::RecurringTimer;
use retention_core::config::AppConfig;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Manages the lifecycle of the batch flush, deriver and stats timers.
pub struct PipelineManager {
    config: AppConfig,
    pipeline: Arc<RetentionPipeline>,
    timers: Vec<RecurringTimer>,
}

impl PipelineManager {
    pub fn new(config: AppConfig, pipeline: Arc<RetentionPipeline>) -> Self {
        Self {
            config,
            pipeline,
            timers: Vec::new(),
        }
    }

    /// Spawn every recurring job. Must be called from within a tokio runtime.
    pub fn start(&mut self) {
        if self.is_running() {
            warn!("Pipeline jobs already running");
            return;
        }

        let writer: Arc<dyn PeriodicJob> = self.pipeline.writer();
        self.timers
            .push(RecurringTimer::start(writer, self.config.batch.flush_interval()));

        let deriver: Arc<dyn PeriodicJob> = self.pipeline.deriver();
        self.timers
            .push(RecurringTimer::start(deriver, self.config.deriver.interval()));

        if self.config.stats.enabled {
            let stats: Arc<dyn PeriodicJob> = Arc::new(StatsReportJob::new(
                self.pipeline.collector(),
                self.pipeline.clock(),
            ));
            self.timers
                .push(RecurringTimer::start(stats, self.config.stats.interval()));
        }

        info!(
            count = self.timers.len(),
            node = %self.config.node_id,
            "All pipeline jobs started"
        );
    }

    /// Stop every timer, then flush pending activity and derive once more so
    /// nothing recorded before shutdown is lost. Safe to call more than once.
    pub async fn stop(&mut self) {
        if self.timers.is_empty() {
            return;
        }
        for timer in self.timers.drain(..) {
            timer.stop().await;
        }

        let flushed = self.pipeline.flush();
        if flushed.failed > 0 {
            warn!(failed = flushed.failed, "Final flush left activity unwritten");
        }
        if let Err(e) = self.pipeline.derive() {
            error!(error = %e, "Final daily visit derivation failed");
        }
        info!(
            applied = flushed.applied,
            node = %self.config.node_id,
            "Pipeline stopped"
        );
    }

    pub fn pipeline(&self) -> Arc<RetentionPipeline> {
        self.pipeline.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.timers.is_empty()
    }

    pub fn task_count(&self) -> usize {
        self.timers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use retention_core::types::Registration;
    use retention_core::{Clock, SystemClock};
    use std::time::Duration;

    fn fast_config(stats: bool) -> AppConfig {
        let mut config = AppConfig::default();
        config.batch.flush_interval_ms = 10;
        config.deriver.interval_ms = 20;
        config.stats.enabled = stats;
        config.stats.interval_secs = 1;
        config
    }

    fn pipeline(config: &AppConfig) -> Arc<RetentionPipeline> {
        let (pipeline, registrations) = RetentionPipeline::in_memory(config, Arc::new(SystemClock));
        registrations.register(Registration::native(
            "@u:hs",
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        Arc::new(pipeline)
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let config = fast_config(true);
        let mut manager = PipelineManager::new(config.clone(), pipeline(&config));
        assert!(!manager.is_running());

        manager.start();
        assert!(manager.is_running());
        assert_eq!(manager.task_count(), 3);

        manager.start();
        assert_eq!(manager.task_count(), 3);

        manager.stop().await;
        assert!(!manager.is_running());
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_stats_job_is_optional() {
        let config = fast_config(false);
        let mut manager = PipelineManager::new(config.clone(), pipeline(&config));
        manager.start();
        assert_eq!(manager.task_count(), 2);
        manager.stop().await;
    }

    #[tokio::test]
    async fn test_timers_flush_pending_activity() {
        let config = fast_config(false);
        let mut manager = PipelineManager::new(config.clone(), pipeline(&config));
        manager.start();

        let pipeline = manager.pipeline();
        pipeline.record_activity("@u:hs", Some("DEV"), "192.0.2.1", None, pipeline.clock().now());
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(pipeline.writer().is_idle());
        assert!(pipeline.deriver().last_run().is_some());

        manager.stop().await;
    }

    #[tokio::test]
    async fn test_stop_flushes_remaining_activity() {
        let mut config = fast_config(false);
        config.batch.flush_interval_ms = 3_600_000;
        config.deriver.interval_ms = 3_600_000;
        let mut manager = PipelineManager::new(config.clone(), pipeline(&config));
        manager.start();

        let pipeline = manager.pipeline();
        pipeline.record_activity("@u:hs", Some("DEV"), "192.0.2.1", None, pipeline.clock().now());
        assert_eq!(pipeline.writer().pending_len(), 1);
        assert!(pipeline.deriver().last_run().is_none());

        manager.stop().await;
        assert!(pipeline.writer().is_idle());
        assert!(pipeline.deriver().last_run().is_some());
        assert_eq!(pipeline.collect_stats().unwrap().daily_active_users, 1);
    }
}
