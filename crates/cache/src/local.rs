//! In-process stores backed by DashMap. Per-key atomicity comes from the
//! shard lock taken by `entry`, so concurrent flushes never need a global lock.

use crate::store::{DailyVisitStore, LastSeenStore, RegistrationStore};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use retention_core::types::{ActivityKey, DailyVisit, LastSeenRecord, Registration, VisitUpsert};
use retention_core::RetentionResult;
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Default)]
pub struct LocalLastSeenStore {
    records: DashMap<ActivityKey, LastSeenRecord>,
}

impl LocalLastSeenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl LastSeenStore for LocalLastSeenStore {
    fn upsert_if_newer(&self, record: LastSeenRecord) -> RetentionResult<bool> {
        match self.records.entry(record.key()) {
            Entry::Occupied(mut entry) => {
                if record.last_seen <= entry.get().last_seen {
                    return Ok(false);
                }
                entry.insert(record);
                Ok(true)
            }
            Entry::Vacant(entry) => {
                entry.insert(record);
                Ok(true)
            }
        }
    }

    fn get(&self, key: &ActivityKey) -> RetentionResult<Option<LastSeenRecord>> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    fn seen_between(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> RetentionResult<Vec<LastSeenRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.last_seen >= from && r.last_seen < until)
            .map(|r| r.value().clone())
            .collect())
    }

    fn latest_per_user(&self) -> RetentionResult<Vec<LastSeenRecord>> {
        let mut latest: BTreeMap<String, LastSeenRecord> = BTreeMap::new();
        for entry in self.records.iter() {
            let record = entry.value();
            match latest.get(&record.user_id) {
                Some(current) if current.last_seen >= record.last_seen => {}
                _ => {
                    latest.insert(record.user_id.clone(), record.clone());
                }
            }
        }
        Ok(latest.into_values().collect())
    }
}

#[derive(Default)]
pub struct LocalDailyVisitStore {
    visits: DashMap<(String, DateTime<Utc>), DailyVisit>,
}

impl LocalDailyVisitStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.visits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visits.is_empty()
    }
}

impl DailyVisitStore for LocalDailyVisitStore {
    fn upsert(&self, visit: DailyVisit) -> RetentionResult<VisitUpsert> {
        let key = (visit.user_id.clone(), visit.visit_day);
        let outcome = match self.visits.entry(key) {
            Entry::Occupied(mut entry) => {
                let stored = entry.get_mut();
                if stored.platform == visit.platform {
                    VisitUpsert::Unchanged
                } else {
                    stored.platform = visit.platform;
                    VisitUpsert::Refreshed
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(visit);
                VisitUpsert::Created
            }
        };
        Ok(outcome)
    }

    fn get(&self, user_id: &str, visit_day: DateTime<Utc>) -> RetentionResult<Option<DailyVisit>> {
        Ok(self
            .visits
            .get(&(user_id.to_string(), visit_day))
            .map(|v| v.value().clone()))
    }

    fn visits_until(
        &self,
        until: DateTime<Utc>,
    ) -> RetentionResult<BTreeMap<String, Vec<DailyVisit>>> {
        let mut by_user: BTreeMap<String, Vec<DailyVisit>> = BTreeMap::new();
        for entry in self.visits.iter() {
            let visit = entry.value();
            if visit.visit_day <= until {
                by_user
                    .entry(visit.user_id.clone())
                    .or_default()
                    .push(visit.clone());
            }
        }
        for visits in by_user.values_mut() {
            visits.sort_by_key(|v| v.visit_day);
        }
        Ok(by_user)
    }
}

/// Stand-in for the external user directory.
#[derive(Default)]
pub struct LocalRegistrationStore {
    users: DashMap<String, Registration>,
}

impl LocalRegistrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, registration: Registration) {
        debug!(user_id = %registration.user_id, kind = registration.kind.as_str(), "user registered");
        self.users.insert(registration.user_id.clone(), registration);
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl RegistrationStore for LocalRegistrationStore {
    fn get(&self, user_id: &str) -> RetentionResult<Option<Registration>> {
        Ok(self.users.get(user_id).map(|r| r.value().clone()))
    }

    fn registrations(&self) -> RetentionResult<Vec<Registration>> {
        Ok(self.users.iter().map(|r| r.value().clone()).collect())
    }
}
