//! Engine configuration.
//!
//! Sources are merged in order, later ones overriding earlier:
//! 1. Type defaults
//! 2. Configuration file from `RULES_CONFIG_PATH` (if set) or an explicit path
//! 3. Environment variables with the `RULES__` prefix, `__` separated
//!    (e.g. `RULES__CRAWLER__INTERVAL_MS=60000`)

mod crawler;
mod engine;
mod lock;
mod pruner;
pub use crawler::*;
pub use engine::*;
pub use lock::*;
pub use pruner::*;
#[cfg(test)]
mod config_test;

use std::env;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct Settings {
    /// Worker pool, work channel and lifecycle
    #[serde(default)]
    pub engine: EngineConfig,
    /// Periodic full scans
    #[serde(default)]
    pub crawler: CrawlerConfig,
    /// Lock composition and sessions
    #[serde(default)]
    pub lock: LockConfig,
    /// Orphaned lock collection
    #[serde(default)]
    pub pruner: PrunerConfig,
}

fn environment() -> Environment {
    Environment::with_prefix("RULES")
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}

impl Settings {
    /// Loads defaults, the file named by `RULES_CONFIG_PATH` and the
    /// environment. Not validated.
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("RULES_CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        let settings: Self = builder.add_source(environment()).build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Layers the file at `path` over the current values, then the
    /// environment again. Not validated.
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let settings: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(environment())
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }

    /// Loads and validates in one go.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let settings = Self::new()?;
        match path {
            Some(path) => settings.with_override_config(path)?.validate(),
            None => settings.validate(),
        }
    }

    pub fn validate(self) -> Result<Self> {
        self.engine.validate()?;
        self.crawler.validate()?;
        self.lock.validate()?;
        self.pruner.validate()?;
        Ok(self)
    }

    /// Prefixes the pruner scans: the configured ones, or the lock key
    /// prefix when none are set.
    pub fn pruner_prefixes(&self) -> Vec<String> {
        if self.pruner.prefixes.is_empty() {
            vec![self.lock.lock_key_prefix.clone()]
        } else {
            self.pruner.prefixes.clone()
        }
    }
}
