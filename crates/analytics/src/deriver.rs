//! Daily visit derivation.
//!
//! On every tick the deriver looks at Last-Seen rows touched since the start
//! of the current UTC day and makes sure each of those users has a
//! [`DailyVisit`] for today. The job is idempotent: re-running it within a day
//! only refreshes the platform of the existing row.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use retention_cache::{DailyVisitStore, LastSeenStore, RegistrationStore};
use retention_core::clock::start_of_day;
use retention_core::types::{DailyVisit, LastSeenRecord, UserKind, VisitUpsert};
use retention_core::{Clock, PlatformClassifier, RetentionResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeriveReport {
    pub created: usize,
    pub refreshed: usize,
    pub unchanged: usize,
    /// Guest or bridged accounts left out.
    pub skipped: usize,
    /// Users whose write failed this tick.
    pub failed: usize,
}

impl DeriveReport {
    fn record(&mut self, outcome: VisitUpsert) {
        match outcome {
            VisitUpsert::Created => self.created += 1,
            VisitUpsert::Refreshed => self.refreshed += 1,
            VisitUpsert::Unchanged => self.unchanged += 1,
        }
    }
}

pub struct DailyVisitDeriver {
    last_seen: Arc<dyn LastSeenStore>,
    visits: Arc<dyn DailyVisitStore>,
    registrations: Arc<dyn RegistrationStore>,
    classifier: Arc<PlatformClassifier>,
    clock: Arc<dyn Clock>,
    exclude_non_native: bool,
    last_run: Mutex<Option<DateTime<Utc>>>,
    /// Day whose rollover catch-up left failed users behind.
    pending_catch_up: Mutex<Option<DateTime<Utc>>>,
}

impl DailyVisitDeriver {
    pub fn new(
        last_seen: Arc<dyn LastSeenStore>,
        visits: Arc<dyn DailyVisitStore>,
        registrations: Arc<dyn RegistrationStore>,
        classifier: Arc<PlatformClassifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            last_seen,
            visits,
            registrations,
            classifier,
            clock,
            exclude_non_native: true,
            last_run: Mutex::new(None),
            pending_catch_up: Mutex::new(None),
        }
    }

    /// Whether guest and bridged accounts are left out of daily visits.
    pub fn with_exclude_non_native(mut self, exclude: bool) -> Self {
        self.exclude_non_native = exclude;
        self
    }

    pub fn last_run(&self) -> Option<DateTime<Utc>> {
        *self.last_run.lock()
    }

    pub fn derive(&self) -> RetentionResult<DeriveReport> {
        self.derive_at(self.clock.now())
    }

    /// Derive visits as of `now`.
    ///
    /// If the day rolled over since the previous run, yesterday is derived
    /// first so that activity between the last tick and midnight still gets
    /// its visit row. Users that failed during that catch-up are retried on
    /// every later tick of the same day.
    pub fn derive_at(&self, now: DateTime<Utc>) -> RetentionResult<DeriveReport> {
        let today = start_of_day(now);
        let mut report = DeriveReport::default();

        let yesterday = today - Duration::days(1);
        let rolled_over = matches!(self.last_run(), Some(previous) if previous < today);
        let retry = *self.pending_catch_up.lock() == Some(yesterday);
        if rolled_over || retry {
            debug!(day = %yesterday, retry, "Deriving previous day");
            self.derive_window(yesterday, today, &mut report)?;
            *self.pending_catch_up.lock() = (report.failed > 0).then_some(yesterday);
        }

        self.derive_window(today, now, &mut report)?;
        *self.last_run.lock() = Some(now);

        metrics::counter!("retention.deriver.visits_created").increment(report.created as u64);
        metrics::counter!("retention.deriver.visits_refreshed").increment(report.refreshed as u64);
        if report.failed > 0 {
            metrics::counter!("retention.deriver.write_errors").increment(report.failed as u64);
        }

        info!(
            created = report.created,
            refreshed = report.refreshed,
            unchanged = report.unchanged,
            skipped = report.skipped,
            failed = report.failed,
            "Daily visits derived"
        );
        Ok(report)
    }

    fn derive_window(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        report: &mut DeriveReport,
    ) -> RetentionResult<()> {
        let records = self.last_seen.seen_between(from, until)?;

        // One visit per user: the most recently active device decides the platform.
        let mut latest: BTreeMap<String, LastSeenRecord> = BTreeMap::new();
        for record in records {
            match latest.get(&record.user_id) {
                Some(current) if current.last_seen >= record.last_seen => {}
                _ => {
                    latest.insert(record.user_id.clone(), record);
                }
            }
        }

        for (user_id, record) in latest {
            if self.exclude_non_native {
                match self.registrations.get(&user_id) {
                    Ok(Some(registration)) if registration.kind != UserKind::Native => {
                        report.skipped += 1;
                        continue;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        report.failed += 1;
                        warn!(user_id = %user_id, error = %e, "Registration lookup failed, will retry");
                        continue;
                    }
                }
            }

            let platform = self.classifier.classify(record.user_agent_str());
            let visit = DailyVisit::new(user_id, platform, record.last_seen);
            match self.visits.upsert(visit) {
                Ok(outcome) => report.record(outcome),
                Err(e) => {
                    report.failed += 1;
                    warn!(user_id = %record.user_id, error = %e, "Failed to upsert daily visit, will retry");
                }
            }
        }
        Ok(())
    }
}
