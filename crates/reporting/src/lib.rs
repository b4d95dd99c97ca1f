//! Read side of the retention pipeline: the two retention metrics, active
//! user counts, and the stats snapshot that bundles them for reporting.

pub mod active;
pub mod retention;
pub mod stats;

pub use active::ActiveUserCounter;
pub use retention::{RetentionCounts, RetentionMetricEngine};
pub use stats::{RetentionStats, StatsCollector};
