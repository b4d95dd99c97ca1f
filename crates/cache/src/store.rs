//! Storage seams. The pipeline only ever talks to these traits; the
//! in-process implementations live in [`crate::local`].

use chrono::{DateTime, Utc};
use retention_core::types::{ActivityKey, DailyVisit, LastSeenRecord, Registration, VisitUpsert};
use retention_core::RetentionResult;
use std::collections::BTreeMap;

/// Rolling per-(user, device) summary of the most recent activity.
pub trait LastSeenStore: Send + Sync {
    /// Stores `record` only if its timestamp is strictly newer than the
    /// stored one for the same key. Returns whether the row changed.
    fn upsert_if_newer(&self, record: LastSeenRecord) -> RetentionResult<bool>;

    fn get(&self, key: &ActivityKey) -> RetentionResult<Option<LastSeenRecord>>;

    /// Records with `from <= last_seen < until`.
    fn seen_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> RetentionResult<Vec<LastSeenRecord>>;

    /// The most recent record of every user, across devices.
    fn latest_per_user(&self) -> RetentionResult<Vec<LastSeenRecord>>;
}

/// Per-user, per-day visit rows.
pub trait DailyVisitStore: Send + Sync {
    /// Creates the (user, day) row or refreshes its platform.
    fn upsert(&self, visit: DailyVisit) -> RetentionResult<VisitUpsert>;

    fn get(&self, user_id: &str, visit_day: DateTime<Utc>) -> RetentionResult<Option<DailyVisit>>;

    /// Visits with `visit_day <= until`, grouped by user, each group sorted
    /// by ascending day.
    fn visits_until(&self, until: DateTime<Utc>)
        -> RetentionResult<BTreeMap<String, Vec<DailyVisit>>>;
}

/// Read-only view of the external user directory.
pub trait RegistrationStore: Send + Sync {
    fn get(&self, user_id: &str) -> RetentionResult<Option<Registration>>;

    fn registrations(&self) -> RetentionResult<Vec<Registration>>;
}
