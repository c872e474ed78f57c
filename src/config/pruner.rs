use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct PrunerConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Interval between prune passes
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Age after which an unchanged lock key is considered orphaned
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Lock prefixes to scan. Empty means the lock key prefix.
    #[serde(default)]
    pub prefixes: Vec<String>,
}

impl Default for PrunerConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
            prefixes: Vec::new(),
        }
    }
}

impl PrunerConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.interval_ms == 0 {
            return Err(Error::Config(ConfigError::Message(
                "pruner.interval_ms must be > 0".into(),
            )));
        }
        if self.timeout_ms < self.interval_ms {
            return Err(Error::Config(ConfigError::Message(format!(
                "pruner.timeout_ms {} must not be shorter than pruner.interval_ms {}",
                self.timeout_ms, self.interval_ms
            ))));
        }
        if let Some(prefix) = self.prefixes.iter().find(|p| p.is_empty()) {
            return Err(Error::Config(ConfigError::Message(format!(
                "pruner.prefixes must not contain empty prefixes: {:?}",
                prefix
            ))));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_enabled() -> bool {
    true
}
fn default_interval_ms() -> u64 {
    60_000
}
fn default_timeout_ms() -> u64 {
    300_000
}
