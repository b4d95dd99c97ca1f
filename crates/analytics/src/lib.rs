//! Write side of the retention pipeline: the batch writer that coalesces
//! activity into the Last-Seen store, and the deriver that turns Last-Seen
//! rows into daily visits.

pub mod batcher;
pub mod deriver;

pub use batcher::{BatchWriter, FlushReport};
pub use deriver::{DailyVisitDeriver, DeriveReport};
