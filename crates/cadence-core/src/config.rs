//! Configuration: per-iterator settings and the layered settings file.
//!
//! `Settings` is loaded once at startup with precedence
//! `default.toml` → `local.toml` → `CADENCE__*` environment variables, and each
//! `[iterators.<name>]` table is turned into a validated [`IteratorConfig`].
//!
//! ```toml
//! [iterators.resource_group_sync]
//! pool_size = 2
//! poll_interval_ms = 1000
//! target_interval_ms = 300000
//! scheduling_type = "REGULAR"
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::domain::SchedulingType;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("iterator '{name}' is invalid: {reason}")]
    Invalid { name: String, reason: String },

    #[error("iterator '{0}' is not configured")]
    NotConfigured(String),
}

/// Options of one pump: how many workers and how often they poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpOptions {
    pub name: String,
    pub pool_size: usize,
    pub poll_interval: Duration,
}

/// Configuration of one logical iterator (one queue over one collection).
///
/// `acceptable_no_alert_delay` and `acceptable_execution_time` only drive
/// warnings; they never change scheduling.
#[derive(Debug, Clone, PartialEq)]
pub struct IteratorConfig {
    pub name: String,
    pub pool_size: usize,
    pub poll_interval: Duration,
    pub target_interval: Duration,
    pub acceptable_no_alert_delay: Duration,
    pub acceptable_execution_time: Option<Duration>,
    pub scheduling_type: SchedulingType,
    /// Skip-missed window: values at or before `claim time + throttle_interval` are dropped.
    pub throttle_interval: Duration,
    pub redistribute: bool,
    pub enabled: bool,
    /// Upper bound on concurrently handled entities across the pump's workers.
    pub max_in_flight: Option<usize>,
    /// First back-off step after a provider error; doubles up to `poll_interval`.
    pub error_backoff: Duration,
}

impl IteratorConfig {
    pub fn new(name: impl Into<String>, scheduling_type: SchedulingType) -> Self {
        Self {
            name: name.into(),
            pool_size: 1,
            poll_interval: Duration::from_secs(10),
            target_interval: Duration::from_secs(60),
            acceptable_no_alert_delay: Duration::from_secs(60),
            acceptable_execution_time: None,
            scheduling_type,
            throttle_interval: Duration::ZERO,
            redistribute: false,
            enabled: true,
            max_in_flight: None,
            error_backoff: Duration::from_millis(100),
        }
    }

    /// Rejects configurations the worker loop cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| {
            Err(ConfigError::Invalid {
                name: self.name.clone(),
                reason: reason.to_string(),
            })
        };

        if self.name.trim().is_empty() {
            return invalid("name must not be empty");
        }
        if self.pool_size == 0 {
            return invalid("pool_size must be greater than 0");
        }
        if self.poll_interval.is_zero() {
            return invalid("poll_interval must be greater than 0");
        }
        if self.scheduling_type == SchedulingType::Regular && self.target_interval.is_zero() {
            return invalid("target_interval must be greater than 0 for REGULAR iterators");
        }
        if self.scheduling_type != SchedulingType::IrregularSkipMissed
            && !self.throttle_interval.is_zero()
        {
            return invalid("throttle_interval only applies to IRREGULAR_SKIP_MISSED iterators");
        }
        if self.max_in_flight == Some(0) {
            return invalid("max_in_flight must be greater than 0 when set");
        }
        if self.error_backoff.is_zero() {
            return invalid("error_backoff must be greater than 0");
        }
        Ok(())
    }

    pub fn pump_options(&self) -> PumpOptions {
        PumpOptions {
            name: self.name.clone(),
            pool_size: self.pool_size,
            poll_interval: self.poll_interval,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// File representation of an [`IteratorConfig`]; durations are milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IteratorSettings {
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_target_interval_ms")]
    pub target_interval_ms: u64,
    #[serde(default = "default_target_interval_ms")]
    pub acceptable_no_alert_delay_ms: u64,
    #[serde(default)]
    pub acceptable_execution_time_ms: Option<u64>,
    #[serde(default = "default_scheduling_type")]
    pub scheduling_type: SchedulingType,
    #[serde(default)]
    pub throttle_interval_ms: u64,
    #[serde(default)]
    pub redistribute: bool,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub max_in_flight: Option<usize>,
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,
}

impl IteratorSettings {
    pub fn to_config(&self, name: &str) -> Result<IteratorConfig, ConfigError> {
        let config = IteratorConfig {
            name: name.to_string(),
            pool_size: self.pool_size,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            target_interval: Duration::from_millis(self.target_interval_ms),
            acceptable_no_alert_delay: Duration::from_millis(self.acceptable_no_alert_delay_ms),
            acceptable_execution_time: self.acceptable_execution_time_ms.map(Duration::from_millis),
            scheduling_type: self.scheduling_type,
            throttle_interval: Duration::from_millis(self.throttle_interval_ms),
            redistribute: self.redistribute,
            enabled: self.enabled,
            max_in_flight: self.max_in_flight,
            error_backoff: Duration::from_millis(self.error_backoff_ms),
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub logging: LoggingSettings,
    #[serde(default)]
    pub database: Option<DatabaseSettings>,
    #[serde(default)]
    pub iterators: BTreeMap<String, IteratorSettings>,
}

impl Settings {
    /// Loads `default.toml` and `local.toml` from `config_dir` (both optional),
    /// then `CADENCE__*` environment overrides.
    pub fn load_from_path<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let settings = Config::builder()
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            .add_source(File::from(config_dir.join("local.toml")).required(false))
            .add_source(
                Environment::with_prefix("CADENCE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Validated configuration of the named iterator.
    pub fn iterator(&self, name: &str) -> Result<IteratorConfig, ConfigError> {
        self.iterators
            .get(name)
            .ok_or_else(|| ConfigError::NotConfigured(name.to_string()))?
            .to_config(name)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_pool_size() -> usize {
    1
}

fn default_poll_interval_ms() -> u64 {
    10_000
}

fn default_target_interval_ms() -> u64 {
    60_000
}

fn default_scheduling_type() -> SchedulingType {
    SchedulingType::Regular
}

fn default_enabled() -> bool {
    true
}

fn default_error_backoff_ms() -> u64 {
    100
}
