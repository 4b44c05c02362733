use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
}

/// Which device to talk to and how patiently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Base URL of the device's local API, e.g. `http://192.168.1.40:8080/api`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Status cache polling behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How often to poll `GET /status`.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Observer-triggered refreshes within this window of the last
    /// successful fetch are suppressed.
    #[serde(default = "default_min_staleness_ms")]
    pub min_staleness_ms: u64,
}

/// Thumbnail retry/back-off behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// Cache-busting token refresh cadence for non-active tabs.
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    /// Number of immediate retries allowed before backing off.
    #[serde(default = "default_quick_retry_limit")]
    pub quick_retry_limit: u32,
    /// Back-off duration once the quick-retry budget is spent.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

/// Countdown timer behavior for the active tab.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    /// Delay between reaching 100% and firing the completion signal.
    #[serde(default = "default_completion_grace_ms")]
    pub completion_grace_ms: u64,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            min_staleness_ms: default_min_staleness_ms(),
        }
    }
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            quick_retry_limit: default_quick_retry_limit(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            completion_grace_ms: default_completion_grace_ms(),
        }
    }
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080/api".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_min_staleness_ms() -> u64 {
    500
}

fn default_refresh_interval_secs() -> u64 {
    30
}

fn default_quick_retry_limit() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    40
}

fn default_tick_ms() -> u64 {
    1_000
}

fn default_completion_grace_ms() -> u64 {
    10
}

impl DeviceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn min_staleness(&self) -> Duration {
        Duration::from_millis(self.min_staleness_ms)
    }
}

impl PreviewConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

impl ProgressConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn completion_grace(&self) -> Duration {
        Duration::from_millis(self.completion_grace_ms)
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
