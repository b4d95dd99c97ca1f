//! Offline replay of recorded activity against a manual clock.

use chrono::{DateTime, Duration, Utc};
use retention_agents::RetentionPipeline;
use retention_cache::LocalRegistrationStore;
use retention_core::config::AppConfig;
use retention_core::types::{ActivityEvent, Registration};
use retention_core::{Clock, ManualClock, RetentionError, RetentionResult};
use retention_reporting::RetentionStats;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

/// One line of an NDJSON activity log.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputLine {
    Register(Registration),
    Activity(ActivityEvent),
}

/// Feeds input lines through a pipeline, running the flush and deriver jobs
/// at the instants their timers would have fired.
pub struct Replay {
    clock: Arc<ManualClock>,
    pipeline: RetentionPipeline,
    registrations: Arc<LocalRegistrationStore>,
    step: Duration,
    next_tick: Option<DateTime<Utc>>,
}

impl Replay {
    pub fn new(config: &AppConfig, start: DateTime<Utc>) -> RetentionResult<Self> {
        let step = Duration::from_std(config.deriver.interval())
            .map_err(|e| RetentionError::Config(format!("deriver.interval_ms: {}", e)))?;
        let clock = Arc::new(ManualClock::new(start));
        let (pipeline, registrations) = RetentionPipeline::in_memory(config, clock.clone());
        Ok(Self {
            clock,
            pipeline,
            registrations,
            step,
            next_tick: None,
        })
    }

    pub fn apply(&mut self, line: InputLine) -> RetentionResult<()> {
        match line {
            InputLine::Register(registration) => {
                self.registrations.register(registration);
            }
            InputLine::Activity(event) => {
                self.run_ticks_until(event.timestamp)?;
                if event.timestamp > self.clock.now() {
                    self.clock.set(event.timestamp);
                }
                self.pipeline.record_activity(
                    &event.user_id,
                    event.device_id.as_deref(),
                    &event.ip,
                    event.user_agent.as_deref(),
                    event.timestamp,
                );
            }
        }
        Ok(())
    }

    /// Run every job tick up to `at`, one last flush and derive, then collect
    /// stats as of `at` (or the last replayed instant).
    pub fn finish(mut self, at: Option<DateTime<Utc>>) -> RetentionResult<RetentionStats> {
        let at = at.unwrap_or_else(|| self.clock.now());
        self.run_ticks_until(at)?;
        if at > self.clock.now() {
            self.clock.set(at);
        }
        self.pipeline.flush();
        self.pipeline.derive()?;
        self.pipeline.collector().collect(at)
    }

    fn run_ticks_until(&mut self, until: DateTime<Utc>) -> RetentionResult<()> {
        let step = self.step;
        let mut next = *self.next_tick.get_or_insert(until + step);
        while next <= until {
            self.clock.set(next);
            self.pipeline.flush();
            let report = self.pipeline.derive()?;
            debug!(at = %next, created = report.created, "Replayed deriver tick");
            next += step;
        }
        self.next_tick = Some(next);
        Ok(())
    }
}
