//! 30-day retention metrics.
//!
//! Two independent queries over the stores, both evaluated against a caller
//! supplied `now` so a report can pin one instant for every query it runs.
//!
//! * **Legacy** ([`RetentionMetricEngine::legacy_retained`]): registered at
//!   least 30 days ago, seen within the trailing 30 days, and that last
//!   sighting is itself at least 30 days after registration.
//! * **Successor** ([`RetentionMetricEngine::successor_retained`]): two daily
//!   visits strictly between 30 and 60 days apart, counted while the 60-day
//!   window opened by the earlier visit is still open. A dormant user who
//!   returns exactly 60 days later does not count until they come back again
//!   within the next window.

use chrono::{DateTime, Duration, Utc};
use retention_cache::{DailyVisitStore, LastSeenStore, RegistrationStore};
use retention_core::types::{DailyVisit, UserKind};
use retention_core::{Platform, PlatformClassifier, RetentionResult};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

/// Metric result keyed by `"all"` and platform name.
pub type RetentionCounts = BTreeMap<String, u64>;

pub const ALL_KEY: &str = "all";
/// Legacy bucket for users whose platform is unclassified.
pub const UNKNOWN_KEY: &str = "unknown";

const RETENTION_WINDOW_DAYS: i64 = 30;

fn window() -> Duration {
    Duration::days(RETENTION_WINDOW_DAYS)
}

fn double_window() -> Duration {
    Duration::days(2 * RETENTION_WINDOW_DAYS)
}

/// Legacy inclusion test for one user.
pub fn legacy_is_retained(
    created_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
    now: DateTime<Utc>,
) -> bool {
    created_at <= now - window() && now - last_seen < window() && last_seen - created_at >= window()
}

/// Finds the visit that makes a user count under the successor metric.
///
/// `visits` must be sorted by ascending day. Anchors are tried from the most
/// recent backwards; the first anchor `a` whose window `[a, a + 60d)` still
/// contains `now` and that has a partner `b <= now` with
/// `30d < b - a < 60d` wins, and its latest such partner is returned.
pub fn successor_retention_visit(visits: &[DailyVisit], now: DateTime<Utc>) -> Option<&DailyVisit> {
    for (i, anchor) in visits.iter().enumerate().rev() {
        if anchor.visit_day > now {
            continue;
        }
        // Earlier anchors only close sooner.
        if now >= anchor.visit_day + double_window() {
            break;
        }
        let partner = visits[i + 1..].iter().rev().find(|later| {
            let gap = later.visit_day - anchor.visit_day;
            later.visit_day <= now && gap > window() && gap < double_window()
        });
        if partner.is_some() {
            return partner;
        }
    }
    None
}

pub struct RetentionMetricEngine {
    last_seen: Arc<dyn LastSeenStore>,
    visits: Arc<dyn DailyVisitStore>,
    registrations: Arc<dyn RegistrationStore>,
    classifier: Arc<PlatformClassifier>,
}

impl RetentionMetricEngine {
    pub fn new(
        last_seen: Arc<dyn LastSeenStore>,
        visits: Arc<dyn DailyVisitStore>,
        registrations: Arc<dyn RegistrationStore>,
        classifier: Arc<PlatformClassifier>,
    ) -> Self {
        Self {
            last_seen,
            visits,
            registrations,
            classifier,
        }
    }

    /// Legacy retention as of `now`.
    ///
    /// Always contains `"all"`; platform buckets (with unclassified users
    /// under `"unknown"`) only appear once they count at least one user.
    /// Bridged accounts are never counted.
    pub fn legacy_retained(&self, now: DateTime<Utc>) -> RetentionResult<RetentionCounts> {
        let registrations = self.registrations.registrations()?;
        let latest: HashMap<String, _> = self
            .last_seen
            .latest_per_user()?
            .into_iter()
            .map(|record| (record.user_id.clone(), record))
            .collect();

        let mut counts = RetentionCounts::new();
        counts.insert(ALL_KEY.to_string(), 0);

        for registration in registrations {
            if registration.kind == UserKind::Bridged {
                continue;
            }
            let Some(record) = latest.get(&registration.user_id) else {
                continue;
            };
            if !legacy_is_retained(registration.created_at, record.last_seen, now) {
                continue;
            }

            let key = match self.classifier.classify(record.user_agent_str()) {
                Platform::Unclassified => UNKNOWN_KEY,
                platform => platform.as_str(),
            };
            *counts.entry(ALL_KEY.to_string()).or_default() += 1;
            *counts.entry(key.to_string()).or_default() += 1;
        }

        debug!(all = counts[ALL_KEY], "Computed legacy retention");
        Ok(counts)
    }

    /// Successor retention as of `now`.
    ///
    /// Always contains `"all"` and every named platform. Users attributed to
    /// an unclassified platform only count towards `"all"`.
    pub fn successor_retained(&self, now: DateTime<Utc>) -> RetentionResult<RetentionCounts> {
        let by_user = self.visits.visits_until(now)?;

        let mut counts = RetentionCounts::new();
        counts.insert(ALL_KEY.to_string(), 0);
        for platform in Platform::NAMED {
            counts.insert(platform.as_str().to_string(), 0);
        }

        for visits in by_user.values() {
            let Some(visit) = successor_retention_visit(visits, now) else {
                continue;
            };
            *counts.entry(ALL_KEY.to_string()).or_default() += 1;
            if visit.platform.is_named() {
                *counts.entry(visit.platform.as_str().to_string()).or_default() += 1;
            }
        }

        debug!(all = counts[ALL_KEY], "Computed successor retention");
        Ok(counts)
    }
}
