use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::constants::CRAWL_CYCLE_HARD_TIMEOUT;
use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct CrawlerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Base interval between crawl cycles
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Relative jitter applied to the interval, clamped to [0, 1]
    #[serde(default = "default_jitter_percent")]
    pub jitter_percent: f64,

    /// Pause between processed keys. 0 disables it.
    #[serde(default)]
    pub key_delay_ms: u64,

    /// Relative jitter applied to the per-key pause
    #[serde(default = "default_jitter_percent")]
    pub key_delay_jitter_percent: f64,

    /// Upper bound of one cycle
    #[serde(default = "default_cycle_timeout_ms")]
    pub cycle_timeout_ms: u64,

    /// When set, a cycle only runs while holding this store lock, so one
    /// engine instance crawls at a time
    #[serde(default)]
    pub mutex_key: Option<String>,

    /// How long to wait for `mutex_key` before skipping the cycle
    #[serde(default = "default_mutex_timeout_ms")]
    pub mutex_timeout_ms: u64,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_ms: default_interval_ms(),
            jitter_percent: default_jitter_percent(),
            key_delay_ms: 0,
            key_delay_jitter_percent: default_jitter_percent(),
            cycle_timeout_ms: default_cycle_timeout_ms(),
            mutex_key: None,
            mutex_timeout_ms: default_mutex_timeout_ms(),
        }
    }
}

impl CrawlerConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.interval_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "crawler.interval_ms must be > 0".into(),
            )));
        }
        if self.cycle_timeout_ms == 0 || self.cycle_timeout() > CRAWL_CYCLE_HARD_TIMEOUT {
            return Err(Error::Config(ConfigError::Message(format!(
                "crawler.cycle_timeout_ms {} must be in (0, {}]",
                self.cycle_timeout_ms,
                CRAWL_CYCLE_HARD_TIMEOUT.as_millis()
            ))));
        }
        if self.jitter_percent.is_nan() || self.key_delay_jitter_percent.is_nan() {
            return Err(Error::Config(ConfigError::Message(
                "crawler jitter percentages must be numbers".into(),
            )));
        }
        if matches!(&self.mutex_key, Some(key) if !key.starts_with('/')) {
            return Err(Error::Config(ConfigError::Message(
                "crawler.mutex_key must start with '/'".into(),
            )));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn key_delay(&self) -> Duration {
        Duration::from_millis(self.key_delay_ms)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_millis(self.cycle_timeout_ms)
    }

    pub fn mutex_timeout(&self) -> Duration {
        Duration::from_millis(self.mutex_timeout_ms)
    }
}

fn default_enabled() -> bool {
    true
}
fn default_interval_ms() -> u64 {
    300_000
}
fn default_jitter_percent() -> f64 {
    0.1
}
fn default_cycle_timeout_ms() -> u64 {
    CRAWL_CYCLE_HARD_TIMEOUT.as_millis() as u64
}
fn default_mutex_timeout_ms() -> u64 {
    1000
}
