//! Active-user and new-user counts that accompany the retention metrics.

use chrono::{DateTime, Duration, Utc};
use retention_cache::{LastSeenStore, RegistrationStore};
use retention_core::types::UserKind;
use retention_core::RetentionResult;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct ActiveUserCounter {
    last_seen: Arc<dyn LastSeenStore>,
    registrations: Arc<dyn RegistrationStore>,
}

impl ActiveUserCounter {
    pub fn new(last_seen: Arc<dyn LastSeenStore>, registrations: Arc<dyn RegistrationStore>) -> Self {
        Self {
            last_seen,
            registrations,
        }
    }

    /// Users seen in the 24 hours before `now`.
    pub fn daily_active_users(&self, now: DateTime<Utc>) -> RetentionResult<u64> {
        self.active_since(now - Duration::days(1))
    }

    /// Users seen in the 30 days before `now`.
    pub fn monthly_active_users(&self, now: DateTime<Utc>) -> RetentionResult<u64> {
        self.active_since(now - Duration::days(30))
    }

    fn active_since(&self, since: DateTime<Utc>) -> RetentionResult<u64> {
        let users = self.last_seen.latest_per_user()?;
        Ok(users.iter().filter(|r| r.last_seen > since).count() as u64)
    }

    /// Accounts created in `(now - 1d, now]`, per kind. Every kind is present.
    pub fn daily_user_kinds(&self, now: DateTime<Utc>) -> RetentionResult<BTreeMap<String, u64>> {
        let since = now - Duration::days(1);
        let mut counts: BTreeMap<String, u64> = UserKind::ALL
            .iter()
            .map(|kind| (kind.as_str().to_string(), 0))
            .collect();

        for registration in self.registrations.registrations()? {
            if registration.created_at > since && registration.created_at <= now {
                *counts.entry(registration.kind.as_str().to_string()).or_default() += 1;
            }
        }
        Ok(counts)
    }
}
