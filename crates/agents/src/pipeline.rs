//! Wiring of stores, writer, deriver and metric engine into one pipeline.

use chrono::{DateTime, Utc};
use retention_analytics::{BatchWriter, DailyVisitDeriver, DeriveReport, FlushReport};
use retention_cache::{
    DailyVisitStore, LastSeenStore, LocalDailyVisitStore, LocalLastSeenStore,
    LocalRegistrationStore, RegistrationStore,
};
use retention_core::config::AppConfig;
use retention_core::types::ActivityEvent;
use retention_core::{Clock, PlatformClassifier, RetentionResult};
use retention_reporting::{
    ActiveUserCounter, RetentionCounts, RetentionMetricEngine, RetentionStats, StatsCollector,
};
use std::sync::Arc;
use tracing::info;

/// Everything one node needs to record activity and answer retention queries.
pub struct RetentionPipeline {
    clock: Arc<dyn Clock>,
    writer: Arc<BatchWriter>,
    deriver: Arc<DailyVisitDeriver>,
    engine: Arc<RetentionMetricEngine>,
    collector: Arc<StatsCollector>,
}

impl RetentionPipeline {
    pub fn new(
        config: &AppConfig,
        clock: Arc<dyn Clock>,
        last_seen: Arc<dyn LastSeenStore>,
        visits: Arc<dyn DailyVisitStore>,
        registrations: Arc<dyn RegistrationStore>,
    ) -> Self {
        let classifier = Arc::new(PlatformClassifier::new(config.platforms.clone()));

        let writer = Arc::new(BatchWriter::new(last_seen.clone()));
        let deriver = Arc::new(
            DailyVisitDeriver::new(
                last_seen.clone(),
                visits.clone(),
                registrations.clone(),
                classifier.clone(),
                clock.clone(),
            )
            .with_exclude_non_native(config.deriver.exclude_non_native),
        );
        let engine = Arc::new(RetentionMetricEngine::new(
            last_seen.clone(),
            visits,
            registrations.clone(),
            classifier.clone(),
        ));
        let active = Arc::new(ActiveUserCounter::new(last_seen, registrations));
        let collector = Arc::new(StatsCollector::new(engine.clone(), active));

        info!(
            node = %config.node_id,
            platform_rules = classifier.rules().len(),
            exclude_non_native = config.deriver.exclude_non_native,
            "Retention pipeline initialized"
        );

        Self {
            clock,
            writer,
            deriver,
            engine,
            collector,
        }
    }

    /// Pipeline backed by the in-process stores. The registration store is
    /// returned so callers can feed it account creations.
    pub fn in_memory(config: &AppConfig, clock: Arc<dyn Clock>) -> (Self, Arc<LocalRegistrationStore>) {
        let registrations = Arc::new(LocalRegistrationStore::new());
        let pipeline = Self::new(
            config,
            clock,
            Arc::new(LocalLastSeenStore::new()),
            Arc::new(LocalDailyVisitStore::new()),
            registrations.clone(),
        );
        (pipeline, registrations)
    }

    /// Note one authenticated request. Never blocks on the stores.
    pub fn record_activity(
        &self,
        user_id: &str,
        device_id: Option<&str>,
        ip: &str,
        user_agent: Option<&str>,
        timestamp: DateTime<Utc>,
    ) {
        self.writer.record(ActivityEvent {
            user_id: user_id.to_string(),
            device_id: device_id.map(str::to_string),
            ip: ip.to_string(),
            user_agent: user_agent.map(str::to_string),
            timestamp,
        });
    }

    pub fn flush(&self) -> FlushReport {
        self.writer.flush()
    }

    pub fn derive(&self) -> RetentionResult<DeriveReport> {
        self.deriver.derive()
    }

    pub fn legacy_retained(&self, now: DateTime<Utc>) -> RetentionResult<RetentionCounts> {
        self.engine.legacy_retained(now)
    }

    pub fn successor_retained(&self, now: DateTime<Utc>) -> RetentionResult<RetentionCounts> {
        self.engine.successor_retained(now)
    }

    pub fn collect_stats(&self) -> RetentionResult<RetentionStats> {
        self.collector.collect(self.clock.now())
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    pub fn writer(&self) -> Arc<BatchWriter> {
        self.writer.clone()
    }

    pub fn deriver(&self) -> Arc<DailyVisitDeriver> {
        self.deriver.clone()
    }

    pub fn collector(&self) -> Arc<StatsCollector> {
        self.collector.clone()
    }
}
