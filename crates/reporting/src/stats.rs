//! Point-in-time bundle of every retention statistic.

use crate::active::ActiveUserCounter;
use crate::retention::{RetentionCounts, RetentionMetricEngine};
use chrono::{DateTime, Utc};
use retention_core::RetentionResult;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetentionStats {
    pub computed_at: DateTime<Utc>,
    pub r30: RetentionCounts,
    pub r30v2: RetentionCounts,
    pub daily_active_users: u64,
    pub monthly_active_users: u64,
    pub daily_user_kinds: BTreeMap<String, u64>,
}

impl RetentionStats {
    /// Flat key/value form handed to whatever ships stats off-box.
    pub fn to_payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("timestamp".into(), Value::from(self.computed_at.timestamp()));
        payload.insert("daily_active_users".into(), Value::from(self.daily_active_users));
        payload.insert("monthly_active_users".into(), Value::from(self.monthly_active_users));
        for (key, count) in &self.r30 {
            payload.insert(format!("r30_users_{}", key), Value::from(*count));
        }
        for (key, count) in &self.r30v2 {
            payload.insert(format!("r30v2_users_{}", key), Value::from(*count));
        }
        for (kind, count) in &self.daily_user_kinds {
            payload.insert(format!("daily_user_type_{}", kind), Value::from(*count));
        }
        payload
    }
}

pub struct StatsCollector {
    engine: Arc<RetentionMetricEngine>,
    active: Arc<ActiveUserCounter>,
}

impl StatsCollector {
    pub fn new(engine: Arc<RetentionMetricEngine>, active: Arc<ActiveUserCounter>) -> Self {
        Self { engine, active }
    }

    /// Runs every query against the same `now`. Any store failure fails the
    /// whole snapshot.
    pub fn collect(&self, now: DateTime<Utc>) -> RetentionResult<RetentionStats> {
        let stats = RetentionStats {
            computed_at: now,
            r30: self.engine.legacy_retained(now)?,
            r30v2: self.engine.successor_retained(now)?,
            daily_active_users: self.active.daily_active_users(now)?,
            monthly_active_users: self.active.monthly_active_users(now)?,
            daily_user_kinds: self.active.daily_user_kinds(now)?,
        };
        info!(
            r30_all = stats.r30.get("all").copied().unwrap_or_default(),
            r30v2_all = stats.r30v2.get("all").copied().unwrap_or_default(),
            dau = stats.daily_active_users,
            mau = stats.monthly_active_users,
            "Collected retention stats"
        );
        Ok(stats)
    }
}
