pub mod clock;
pub mod config;
pub mod error;
pub mod platform;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AppConfig;
pub use error::{RetentionError, RetentionResult};
pub use platform::{Platform, PlatformClassifier, PlatformRule};
