use crate::error::{RetentionError, RetentionResult};
use crate::platform::{default_rules, PlatformRule};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Shortest Last-Seen retention that keeps the legacy metric correct.
pub const MIN_LAST_SEEN_MAX_AGE_DAYS: u32 = 30;
/// Shortest Daily-Visit retention that keeps the successor metric correct.
pub const MIN_DAILY_VISITS_MAX_AGE_DAYS: u32 = 61;

/// Root configuration. Loaded from an optional TOML file and environment
/// variables with the prefix `RETENTION__`.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub deriver: DeriverConfig,
    #[serde(default)]
    pub pruning: PruningConfig,
    #[serde(default)]
    pub stats: StatsConfig,
    #[serde(default = "default_rules")]
    pub platforms: Vec<PlatformRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeriverConfig {
    #[serde(default = "default_deriver_interval_ms")]
    pub interval_ms: u64,
    /// Skip guest and bridged accounts when deriving daily visits.
    #[serde(default = "default_exclude_non_native")]
    pub exclude_non_native: bool,
}

/// Retention horizons the external pruning job must honour.
#[derive(Debug, Clone, Deserialize)]
pub struct PruningConfig {
    #[serde(default = "default_last_seen_max_age_days")]
    pub last_seen_max_age_days: u32,
    #[serde(default = "default_daily_visits_max_age_days")]
    pub daily_visits_max_age_days: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatsConfig {
    #[serde(default = "default_stats_enabled")]
    pub enabled: bool,
    #[serde(default = "default_stats_interval_secs")]
    pub interval_secs: u64,
}

fn default_node_id() -> String {
    "node-01".to_string()
}
fn default_flush_interval_ms() -> u64 {
    5_000
}
fn default_deriver_interval_ms() -> u64 {
    300_000
}
fn default_exclude_non_native() -> bool {
    true
}
fn default_last_seen_max_age_days() -> u32 {
    30
}
fn default_daily_visits_max_age_days() -> u32 {
    90
}
fn default_stats_enabled() -> bool {
    true
}
fn default_stats_interval_secs() -> u64 {
    3 * 60 * 60
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

impl Default for DeriverConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_deriver_interval_ms(),
            exclude_non_native: default_exclude_non_native(),
        }
    }
}

impl Default for PruningConfig {
    fn default() -> Self {
        Self {
            last_seen_max_age_days: default_last_seen_max_age_days(),
            daily_visits_max_age_days: default_daily_visits_max_age_days(),
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: default_stats_enabled(),
            interval_secs: default_stats_interval_secs(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            batch: BatchConfig::default(),
            deriver: DeriverConfig::default(),
            pruning: PruningConfig::default(),
            stats: StatsConfig::default(),
            platforms: default_rules(),
        }
    }
}

impl BatchConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

impl DeriverConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

impl StatsConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl AppConfig {
    /// Load configuration from environment variables and an optional config file.
    pub fn load(path: Option<&Path>) -> RetentionResult<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let builder = builder.add_source(
            config::Environment::with_prefix("RETENTION")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        debug!(
            path = ?path,
            platform_rules = config.platforms.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    pub fn validate(&self) -> RetentionResult<()> {
        if self.batch.flush_interval_ms == 0 {
            return Err(RetentionError::Config(
                "batch.flush_interval_ms must be greater than zero".into(),
            ));
        }
        if self.deriver.interval_ms == 0 {
            return Err(RetentionError::Config(
                "deriver.interval_ms must be greater than zero".into(),
            ));
        }
        if self.stats.enabled && self.stats.interval_secs == 0 {
            return Err(RetentionError::Config(
                "stats.interval_secs must be greater than zero".into(),
            ));
        }
        if self.pruning.last_seen_max_age_days < MIN_LAST_SEEN_MAX_AGE_DAYS {
            return Err(RetentionError::Config(format!(
                "pruning.last_seen_max_age_days must be at least {} (got {})",
                MIN_LAST_SEEN_MAX_AGE_DAYS, self.pruning.last_seen_max_age_days
            )));
        }
        if self.pruning.daily_visits_max_age_days < MIN_DAILY_VISITS_MAX_AGE_DAYS {
            return Err(RetentionError::Config(format!(
                "pruning.daily_visits_max_age_days must be at least {} (got {})",
                MIN_DAILY_VISITS_MAX_AGE_DAYS, self.pruning.daily_visits_max_age_days
            )));
        }
        if self.platforms.is_empty() {
            return Err(RetentionError::Config("platforms table is empty".into()));
        }
        if let Some(i) = self.platforms.iter().position(PlatformRule::is_empty) {
            return Err(RetentionError::Config(format!(
                "platforms[{}] has no patterns and would match every user agent",
                i
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::Platform;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.batch.flush_interval(), Duration::from_secs(5));
        assert_eq!(config.deriver.interval(), Duration::from_secs(300));
        assert_eq!(config.platforms.len(), 5);
    }

    #[test]
    fn test_rejects_short_horizons() {
        let mut config = AppConfig::default();
        config.pruning.last_seen_max_age_days = 29;
        assert!(matches!(config.validate(), Err(RetentionError::Config(_))));

        let mut config = AppConfig::default();
        config.pruning.daily_visits_max_age_days = 60;
        assert!(matches!(config.validate(), Err(RetentionError::Config(_))));

        config.pruning.daily_visits_max_age_days = 61;
        config.validate().unwrap();
    }

    #[test]
    fn test_rejects_zero_intervals_and_empty_rules() {
        let mut config = AppConfig::default();
        config.batch.flush_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.deriver.interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.platforms.push(PlatformRule::new(Platform::Web, &[], &[]));
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.platforms.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!(
            "retention-config-test-{}.toml",
            std::process::id()
        ));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
node_id = "stats-02"

[batch]
flush_interval_ms = 1000

[deriver]
interval_ms = 60000
exclude_non_native = false

[[platforms]]
platform = "android"
any_of = ["fluffychat"]
all_of = ["android"]
"#
        )
        .unwrap();
        drop(file);

        let config = AppConfig::load(Some(&path)).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.node_id, "stats-02");
        assert_eq!(config.batch.flush_interval_ms, 1000);
        assert_eq!(config.deriver.interval_ms, 60_000);
        assert!(!config.deriver.exclude_non_native);
        assert_eq!(config.pruning.daily_visits_max_age_days, 90);
        assert_eq!(config.platforms.len(), 1);
        assert_eq!(config.platforms[0].platform, Platform::Android);
    }
}
