//! # d-rules
//!
//! A rules engine over a watchable key-value store.
//!
//! Clients register declarative rules over classes of keys (path patterns
//! with `:variable` segments). Whenever the store's state makes a rule true,
//! its callback runs under a lock derived from the rule's bound variables.
//!
//! ## Pipeline
//!
//! - A [`Watcher`] per watched prefix pushes every change to the
//!   [`KeyProcessor`]
//! - The [`Crawler`] periodically scans every prefix and reconciles what
//!   the watchers missed
//! - The [`KeyProcessor`] compiles the matching [`DynamicRule`]s into
//!   [`StaticRule`]s, checks them and queues [`WorkItem`]s on a bounded
//!   channel
//! - Workers re-check each item, lock, check again and invoke the
//!   [`RuleCallback`]
//! - The [`LockPruner`] removes lock keys left behind by crashed holders
//!
//! ## Example
//!
//! ```ignore
//! let store = Arc::new(MemoryStore::new());
//! let mut engine = Engine::new(Settings::load(None)?, store, Arc::new(NoopMetrics));
//! engine.add_rule(
//!     DynamicRule::equals_literal("/jobs/:id/state", Some("done"))?,
//!     "/jobs/:id",
//!     callback_fn(|task| async move {
//!         tracing::info!(id = ?task.attribute("id"), "job done");
//!         Ok(())
//!     }),
//!     RuleOptions::default(),
//! )?;
//! engine.start()?;
//! ```

mod config;
mod constants;
mod crawler;
mod engine;
mod errors;
mod lock;
mod metrics;
mod pattern;
mod processor;
mod pruner;
mod rule;
mod store;
mod watcher;
mod worker;

pub use config::*;
pub use constants::*;
pub use crawler::*;
pub use engine::*;
pub use errors::*;
pub use lock::*;
pub use metrics::*;
pub use pattern::*;
pub use processor::*;
pub use pruner::*;
pub use rule::*;
pub use store::*;
pub use watcher::*;
pub use worker::*;

#[cfg(test)]
pub mod test_utils;
