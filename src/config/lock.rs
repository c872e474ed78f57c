use std::time::Duration;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct LockConfig {
    /// Reuse one supervised session for every store lock instead of one
    /// session per lock
    #[serde(default = "default_shared_session")]
    pub shared_session: bool,

    /// TTL of the shared session
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Delay between attempts to replace a lost shared session
    #[serde(default = "default_session_retry_delay_ms")]
    pub session_retry_delay_ms: u64,

    /// When set, repeated lock attempts on one key within this window are
    /// rejected before reaching the store
    #[serde(default)]
    pub cool_off_ms: Option<u64>,

    /// Prepended to every resolved lock key
    #[serde(default = "default_lock_key_prefix")]
    pub lock_key_prefix: String,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            shared_session: default_shared_session(),
            session_ttl_secs: default_session_ttl_secs(),
            session_retry_delay_ms: default_session_retry_delay_ms(),
            cool_off_ms: None,
            lock_key_prefix: default_lock_key_prefix(),
        }
    }
}

impl LockConfig {
    pub fn validate(&self) -> Result<()> {
        if self.session_ttl_secs == 0 {
            return Err(Error::Config(ConfigError::Message(
                "lock.session_ttl_secs must be > 0".into(),
            )));
        }
        if !self.lock_key_prefix.is_empty()
            && (!self.lock_key_prefix.starts_with('/') || self.lock_key_prefix.ends_with('/'))
        {
            return Err(Error::Config(ConfigError::Message(format!(
                "lock.lock_key_prefix '{}' must start with '/' and not end with '/'",
                self.lock_key_prefix
            ))));
        }
        if self.cool_off_ms == Some(0) {
            return Err(Error::Config(ConfigError::Message(
                "lock.cool_off_ms must be > 0 when set".into(),
            )));
        }
        Ok(())
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn session_retry_delay(&self) -> Duration {
        Duration::from_millis(self.session_retry_delay_ms)
    }

    pub fn cool_off(&self) -> Option<Duration> {
        self.cool_off_ms.map(Duration::from_millis)
    }
}

fn default_shared_session() -> bool {
    true
}
fn default_session_ttl_secs() -> u64 {
    60
}
fn default_session_retry_delay_ms() -> u64 {
    1000
}
fn default_lock_key_prefix() -> String {
    "/rules-locks".to_string()
}
