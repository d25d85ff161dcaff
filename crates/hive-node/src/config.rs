//! Node configuration types
//!
//! Loaded from an optional TOML file, then overridden by environment
//! variables of the form `HIVE__<SECTION>__<KEY>`, e.g.
//! `HIVE__SCHEDULER__SWEEP_INTERVAL_SECS=60`.

use hive_core::{units, Amount, HiveError, MAX_LAYERS};
use hive_matrix::PlacementConfig;
use hive_rewards::{RewardConfig, SweepConfig, SweepRunnerConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "HIVE";

/// Complete node configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HiveConfig {
    /// Placement and reward parameters
    #[serde(default)]
    pub engine: EngineSettings,

    /// Expiry sweep
    #[serde(default)]
    pub scheduler: SchedulerSettings,

    /// Snapshot storage
    #[serde(default)]
    pub storage: StorageSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingSettings,

    /// Metrics configuration
    #[serde(default)]
    pub metrics: MetricsSettings,
}

/// Placement and reward parameters
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Hours a reward stays claimable
    #[serde(default = "default_reward_window_hours")]
    pub reward_window_hours: i64,

    /// Referral hops walked before a reward is forfeited
    #[serde(default = "default_rollup_hop_cap")]
    pub rollup_hop_cap: u32,

    /// Matrices a new member joins along the referral chain
    #[serde(default = "default_upline_depth")]
    pub upline_depth: u32,

    /// Deepest matrix layer
    #[serde(default = "default_max_layers")]
    pub max_layers: u8,

    /// Transferable BCC granted at activation, in whole BCC
    #[serde(default = "default_welcome_bcc")]
    pub welcome_bcc: u64,

    /// Event bus capacity
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_reward_window_hours() -> i64 {
    hive_core::constants::REWARD_WINDOW_HOURS
}

fn default_rollup_hop_cap() -> u32 {
    hive_core::constants::ROLLUP_HOP_CAP
}

fn default_upline_depth() -> u32 {
    hive_core::constants::UPLINE_PROPAGATION_DEPTH
}

fn default_max_layers() -> u8 {
    MAX_LAYERS
}

fn default_welcome_bcc() -> u64 {
    500
}

fn default_event_capacity() -> usize {
    hive_rewards::events::DEFAULT_EVENT_CAPACITY
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            reward_window_hours: default_reward_window_hours(),
            rollup_hop_cap: default_rollup_hop_cap(),
            upline_depth: default_upline_depth(),
            max_layers: default_max_layers(),
            welcome_bcc: default_welcome_bcc(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl EngineSettings {
    pub fn reward_window(&self) -> chrono::Duration {
        chrono::Duration::hours(self.reward_window_hours)
    }

    pub fn welcome_bcc_amount(&self) -> Amount {
        units(self.welcome_bcc)
    }
}

/// Expiry sweep settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchedulerSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between sweep passes
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Sweep once as soon as the node starts
    #[serde(default = "default_true")]
    pub sweep_on_start: bool,

    /// Hours-left thresholds for expiring-soon reminders
    #[serde(default = "default_reminder_thresholds")]
    pub reminder_thresholds_hours: Vec<i64>,
}

fn default_true() -> bool {
    true
}

fn default_sweep_interval_secs() -> u64 {
    300
}

fn default_reminder_thresholds() -> Vec<i64> {
    hive_core::constants::REMINDER_THRESHOLDS_HOURS.to_vec()
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            sweep_interval_secs: default_sweep_interval_secs(),
            sweep_on_start: true,
            reminder_thresholds_hours: default_reminder_thresholds(),
        }
    }
}

/// Snapshot storage settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Data directory
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Snapshot file name inside `data_dir`
    #[serde(default = "default_snapshot_file")]
    pub snapshot_file: String,

    /// Write a snapshot when the node stops
    #[serde(default = "default_true")]
    pub snapshot_on_shutdown: bool,
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_snapshot_file() -> String {
    "ledger.json".to_string()
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            snapshot_file: default_snapshot_file(),
            snapshot_on_shutdown: true,
        }
    }
}

impl StorageSettings {
    pub fn snapshot_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(&self.snapshot_file)
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: `text` or `json`
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl LoggingSettings {
    pub fn is_json(&self) -> bool {
        self.format.eq_ignore_ascii_case("json")
    }
}

/// Metrics configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsSettings {
    /// Enable metrics
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics address
    #[serde(default = "default_metrics_address")]
    pub listen_addr: String,
}

fn default_metrics_address() -> String {
    "127.0.0.1:9615".to_string()
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: default_metrics_address(),
        }
    }
}

impl HiveConfig {
    /// Load defaults, then `path` if it exists, then `HIVE__*` variables
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::new(&path.to_string_lossy(), config::FileFormat::Toml)
                    .required(false),
            );
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: HiveConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without consulting the environment
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: HiveConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Render as TOML, e.g. for `hive init-config`
    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> hive_core::Result<()> {
        let invalid = |msg: String| Err(HiveError::Config(msg));

        if self.engine.reward_window_hours <= 0 {
            return invalid("engine.reward_window_hours must be positive".into());
        }
        if self.engine.rollup_hop_cap == 0 {
            return invalid("engine.rollup_hop_cap must be at least 1".into());
        }
        if self.engine.upline_depth == 0 {
            return invalid("engine.upline_depth must be at least 1".into());
        }
        if self.engine.max_layers == 0 || self.engine.max_layers > MAX_LAYERS {
            return invalid(format!("engine.max_layers must be in 1..={}", MAX_LAYERS));
        }
        if self.scheduler.sweep_interval_secs == 0 {
            return invalid("scheduler.sweep_interval_secs must be positive".into());
        }
        if let Some(bad) = self
            .scheduler
            .reminder_thresholds_hours
            .iter()
            .find(|&&hours| hours <= 0 || hours >= self.engine.reward_window_hours)
        {
            return invalid(format!(
                "reminder threshold {}h must be inside the {}h window",
                bad, self.engine.reward_window_hours
            ));
        }
        if !matches!(self.logging.format.to_ascii_lowercase().as_str(), "text" | "json") {
            return invalid(format!("unknown log format '{}'", self.logging.format));
        }
        if self.metrics.enabled && self.metrics.listen_addr.parse::<SocketAddr>().is_err() {
            return invalid(format!(
                "metrics.listen_addr '{}' is not a socket address",
                self.metrics.listen_addr
            ));
        }
        Ok(())
    }

    pub fn placement_config(&self) -> PlacementConfig {
        PlacementConfig {
            max_layers: self.engine.max_layers,
            upline_depth: self.engine.upline_depth,
            ..Default::default()
        }
    }

    pub fn reward_config(&self) -> RewardConfig {
        RewardConfig {
            window: self.engine.reward_window(),
            welcome_bcc: self.engine.welcome_bcc_amount(),
        }
    }

    pub fn sweep_config(&self) -> SweepConfig {
        SweepConfig {
            hop_cap: self.engine.rollup_hop_cap,
            window: self.engine.reward_window(),
            reminder_thresholds: self.scheduler.reminder_thresholds_hours.clone(),
        }
    }

    pub fn runner_config(&self) -> SweepRunnerConfig {
        SweepRunnerConfig {
            interval: Duration::from_secs(self.scheduler.sweep_interval_secs),
            sweep_on_start: self.scheduler.sweep_on_start,
            enabled: self.scheduler.enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = HiveConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.reward_window_hours, 72);
        assert_eq!(config.engine.rollup_hop_cap, 10);
        assert_eq!(config.engine.welcome_bcc_amount(), units(500));
        assert_eq!(config.scheduler.reminder_thresholds_hours, vec![24, 6]);
        assert_eq!(
            config.storage.snapshot_path(),
            Path::new("./data").join("ledger.json")
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hive.toml");
        std::fs::write(
            &path,
            "[scheduler]\nsweep_interval_secs = 60\n\n[metrics]\nenabled = false\n",
        )
        .unwrap();

        let config = HiveConfig::load(Some(path.as_path())).unwrap();
        assert_eq!(config.scheduler.sweep_interval_secs, 60);
        assert!(!config.metrics.enabled);
        assert_eq!(config.engine.rollup_hop_cap, 10);
        assert_eq!(config.runner_config().interval, Duration::from_secs(60));
    }

    #[test]
    fn test_missing_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let config = HiveConfig::load(Some(dir.path().join("absent.toml").as_path())).unwrap();
        assert_eq!(config.engine.reward_window_hours, 72);
    }

    #[test]
    fn test_rejects_zero_values() {
        let mut config = HiveConfig::default();
        config.engine.reward_window_hours = 0;
        assert!(matches!(config.validate(), Err(HiveError::Config(_))));

        let mut config = HiveConfig::default();
        config.engine.rollup_hop_cap = 0;
        assert!(config.validate().is_err());

        let mut config = HiveConfig::default();
        config.scheduler.sweep_interval_secs = 0;
        assert!(config.validate().is_err());

        let mut config = HiveConfig::default();
        config.scheduler.reminder_thresholds_hours = vec![80];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_template_parses_back() {
        let rendered = HiveConfig::default().to_toml().unwrap();
        let parsed = HiveConfig::from_toml_str(&rendered).unwrap();
        assert_eq!(parsed.storage.snapshot_file, "ledger.json");
        assert_eq!(parsed.sweep_config().hop_cap, 10);
    }
}
