use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct EngineConfig {
    /// Lock TTL for rules without their own
    #[serde(default = "default_lock_ttl_ms")]
    pub default_lock_ttl_ms: u64,

    /// Number of workers
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Capacity of the work channel. Producers block when it is full.
    #[serde(default = "default_channel_buffer_size")]
    pub channel_buffer_size: usize,

    /// Maximum lifetime of one watch subscription before it is re-created.
    /// 0 means unbounded.
    #[serde(default)]
    pub watch_timeout_ms: u64,

    /// Delay before a terminated watcher is restarted
    #[serde(default = "default_watch_restart_delay_ms")]
    pub watch_restart_delay_ms: u64,

    /// How long a worker waits for a store-backed lock
    #[serde(default = "default_lock_acquisition_timeout_ms")]
    pub lock_acquisition_timeout_ms: u64,

    /// Bound on graceful shutdown
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_lock_ttl_ms: default_lock_ttl_ms(),
            concurrency: default_concurrency(),
            channel_buffer_size: default_channel_buffer_size(),
            watch_timeout_ms: 0,
            watch_restart_delay_ms: default_watch_restart_delay_ms(),
            lock_acquisition_timeout_ms: default_lock_acquisition_timeout_ms(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.concurrency == 0 {
            return Err(Error::Config(ConfigError::Message(
                "engine.concurrency must be > 0".into(),
            )));
        }
        if self.channel_buffer_size == 0 {
            return Err(Error::Config(ConfigError::Message(
                "engine.channel_buffer_size must be > 0".into(),
            )));
        }
        if self.default_lock_ttl_ms < 1000 {
            return Err(Error::Config(ConfigError::Message(format!(
                "engine.default_lock_ttl_ms {} must be at least 1000, leases have second granularity",
                self.default_lock_ttl_ms
            ))));
        }
        Ok(())
    }

    pub fn default_lock_ttl(&self) -> Duration {
        Duration::from_millis(self.default_lock_ttl_ms)
    }

    pub fn watch_timeout(&self) -> Duration {
        Duration::from_millis(self.watch_timeout_ms)
    }

    pub fn watch_restart_delay(&self) -> Duration {
        Duration::from_millis(self.watch_restart_delay_ms)
    }

    pub fn lock_acquisition_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_acquisition_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

fn default_lock_ttl_ms() -> u64 {
    30_000
}
fn default_concurrency() -> usize {
    5
}
fn default_channel_buffer_size() -> usize {
    100
}
fn default_watch_restart_delay_ms() -> u64 {
    1000
}
fn default_lock_acquisition_timeout_ms() -> u64 {
    5000
}
fn default_shutdown_timeout_ms() -> u64 {
    10_000
}
