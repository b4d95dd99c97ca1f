//! Coalescing writer for per-request activity.
//!
//! Every authenticated request produces an [`ActivityEvent`]; writing each one
//! straight into the Last-Seen store would cost one upsert per request. The
//! [`BatchWriter`] instead keeps only the newest event per (user, device) in a
//! concurrent map and commits the survivors on each flush tick.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use retention_cache::LastSeenStore;
use retention_core::types::{ActivityEvent, ActivityKey};
use std::sync::Arc;
use tracing::{debug, warn};

/// Outcome of a single flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Keys whose Last-Seen row moved forward.
    pub applied: usize,
    /// Keys the store already had a newer-or-equal timestamp for.
    pub stale: usize,
    /// Keys left in the accumulator for the next tick.
    pub failed: usize,
}

impl FlushReport {
    pub fn total(&self) -> usize {
        self.applied + self.stale + self.failed
    }
}

pub struct BatchWriter {
    pending: DashMap<ActivityKey, ActivityEvent>,
    store: Arc<dyn LastSeenStore>,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn LastSeenStore>) -> Self {
        Self {
            pending: DashMap::new(),
            store,
        }
    }

    /// Fold an event into the accumulator (non-blocking beyond the shard lock).
    pub fn record(&self, event: ActivityEvent) {
        match self.pending.entry(event.key()) {
            Entry::Occupied(mut entry) => {
                if event.timestamp > entry.get().timestamp {
                    entry.insert(event);
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(event);
            }
        }
        metrics::counter!("retention.batch.recorded").increment(1);
    }

    /// Commit the accumulator to the Last-Seen store.
    ///
    /// Each key is an independent upsert: a failing key stays pending and is
    /// retried on the next flush, the rest of the batch still goes through.
    pub fn flush(&self) -> FlushReport {
        let batch: Vec<ActivityEvent> = self.pending.iter().map(|e| e.value().clone()).collect();
        let mut report = FlushReport::default();
        if batch.is_empty() {
            return report;
        }

        debug!(count = batch.len(), "Flushing activity batch to last-seen store");

        for event in batch {
            let key = event.key();
            let flushed_at = event.timestamp;
            match self.store.upsert_if_newer(event.into_last_seen()) {
                Ok(applied) => {
                    if applied {
                        report.applied += 1;
                    } else {
                        report.stale += 1;
                    }
                    // A newer event may have arrived while we were writing.
                    self.pending
                        .remove_if(&key, |_, pending| pending.timestamp <= flushed_at);
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(key = %key, error = %e, "Failed to flush last-seen entry, will retry");
                }
            }
        }

        metrics::counter!("retention.batch.flushed").increment(report.applied as u64);
        metrics::counter!("retention.batch.dropped_stale").increment(report.stale as u64);
        if report.failed > 0 {
            metrics::counter!("retention.batch.flush_errors").increment(report.failed as u64);
        }
        metrics::gauge!("retention.batch.pending").set(self.pending.len() as f64);

        debug!(
            applied = report.applied,
            stale = report.stale,
            failed = report.failed,
            "Activity batch flushed"
        );
        report
    }

    /// Number of (user, device) keys waiting for the next flush.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}
