#![warn(clippy::unwrap_used)]

pub mod local;
pub mod store;

pub use local::{LocalDailyVisitStore, LocalLastSeenStore, LocalRegistrationStore};
pub use store::{DailyVisitStore, LastSeenStore, RegistrationStore};
