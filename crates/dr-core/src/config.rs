use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration loaded from `~/.drover/config.toml`.
///
/// Credentials never live here; the gt CLI carries its own auth.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub gt: GtConfig,
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub convoy: ConvoyConfig,
}

impl Config {
    /// Load config from the default path, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            let cfg = Config::default();
            cfg.validate()?;
            Ok(cfg)
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Semantic validation for settings not expressible via type checks.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gt.binary.trim().is_empty() {
            return Err(ConfigError::Validation("gt.binary must not be empty".into()));
        }
        if self.reconciler.workers == 0 {
            return Err(ConfigError::Validation(
                "reconciler.workers must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".drover")
            .join("config.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
    #[error("validation: {0}")]
    Validation(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GtConfig {
    /// Binary name or path for the gt CLI.
    #[serde(default = "default_gt_binary")]
    pub binary: String,
    /// Rig the daemon reconciles polecats in.
    #[serde(default = "default_rig")]
    pub rig: String,
    /// Hard timeout for one gt invocation.
    #[serde(default = "default_invoke_timeout_secs")]
    pub invoke_timeout_secs: u64,
}

impl GtConfig {
    pub fn invoke_timeout(&self) -> Duration {
        Duration::from_secs(self.invoke_timeout_secs)
    }
}

impl Default for GtConfig {
    fn default() -> Self {
        Self {
            binary: default_gt_binary(),
            rig: default_rig(),
            invoke_timeout_secs: default_invoke_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Concurrent reconciliation workers.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Requeue interval while a polecat is working.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Requeue interval after a failed external call.
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    /// Full resync sweep interval.
    #[serde(default = "default_resync_interval_secs")]
    pub resync_interval_secs: u64,
    /// A working polecat with no session activity for this long is stuck.
    #[serde(default = "default_stall_threshold_secs")]
    pub stall_threshold_secs: u64,
}

impl ReconcilerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.retry_interval_secs)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.stall_threshold_secs)
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_secs: default_poll_interval_secs(),
            retry_interval_secs: default_retry_interval_secs(),
            resync_interval_secs: default_resync_interval_secs(),
            stall_threshold_secs: default_stall_threshold_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// How long the circuit stays open before probing.
    #[serde(default = "default_reset_timeout_secs")]
    pub reset_timeout_secs: u64,
    /// Probe budget while half-open.
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

impl BreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_secs(self.reset_timeout_secs)
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            reset_timeout_secs: default_reset_timeout_secs(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvoyConfig {
    /// gt mail address that receives convoy completion notices.
    #[serde(default = "default_notify_address")]
    pub notify_address: String,
    /// Requeue interval while a convoy is still running.
    #[serde(default = "default_convoy_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

impl ConvoyConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for ConvoyConfig {
    fn default() -> Self {
        Self {
            notify_address: default_notify_address(),
            poll_interval_secs: default_convoy_poll_interval_secs(),
        }
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "human".to_string()
}

fn default_gt_binary() -> String {
    "gt".to_string()
}

fn default_rig() -> String {
    "main".to_string()
}

fn default_invoke_timeout_secs() -> u64 {
    30
}

fn default_workers() -> usize {
    4
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_retry_interval_secs() -> u64 {
    30
}

fn default_resync_interval_secs() -> u64 {
    300
}

fn default_stall_threshold_secs() -> u64 {
    1800
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_secs() -> u64 {
    30
}

fn default_half_open_max_calls() -> u32 {
    1
}

fn default_notify_address() -> String {
    "overseer".to_string()
}

fn default_convoy_poll_interval_secs() -> u64 {
    30
}
