//! Rule algebra and registry.
//!
//! A [`DynamicRule`] is a condition template over key patterns. Observing a
//! concrete key compiles it into a [`StaticRule`] bound to concrete keys,
//! which can then be checked cheaply ([`StaticRule::satisfiable`]) and
//! authoritatively ([`StaticRule::satisfied`]). The [`RuleManager`] indexes
//! registered rules and maintains the prefixes to watch and crawl.

mod dynamic;
mod manager;
mod static_rule;


use std::time::Duration;

pub use dynamic::*;
pub use manager::*;
pub use static_rule::*;

/// Per-rule registration options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleOptions {
    /// Higher priority prefixes are watched and crawled first
    pub priority: u32,
    /// Evaluate by crawling only; never watched
    pub crawler_only: bool,
    /// Overrides the engine's default lock TTL
    pub lock_ttl: Option<Duration>,
    /// Stable rule id. Must be unique when set.
    pub rule_id: Option<String>,
}

impl RuleOptions {
    pub fn with_priority(
        mut self,
        priority: u32,
    ) -> Self {
        self.priority = priority;
        self
    }

    pub fn crawler_only(mut self) -> Self {
        self.crawler_only = true;
        self
    }

    pub fn with_lock_ttl(
        mut self,
        ttl: Duration,
    ) -> Self {
        self.lock_ttl = Some(ttl);
        self
    }

    pub fn with_rule_id(
        mut self,
        id: impl Into<String>,
    ) -> Self {
        self.rule_id = Some(id.into());
        self
    }
}
