//! Rules Engine Error Hierarchy
//!
//! Defines the error types for the rules engine, categorized by the layer
//! that produces them: rule registration, backing store access, and locking.

use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Malformed rule or lock-key pattern (registration time)
    #[error(transparent)]
    Pattern(#[from] PatternError),

    /// Backing store failures
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Lock acquisition and release failures
    #[error(transparent)]
    Lock(#[from] LockError),

    /// Engine configuration validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A rule id was registered twice
    #[error("Duplicate rule id: {0}")]
    DuplicateRuleId(String),

    /// Terminal failure of a watch subscription
    #[error("Watch stream on prefix {prefix} terminated: {source}")]
    WatchStream {
        prefix: String,
        #[source]
        source: StoreError,
    },

    /// Operation is not allowed in the engine's current lifecycle state
    #[error("Engine is {0}")]
    InvalidState(&'static str),

    /// A producer or worker task panicked
    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),

    /// Graceful shutdown did not complete in time
    #[error("Shutdown timeout after {0:?}")]
    ShutdownTimeout(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("Pattern is empty")]
    Empty,

    #[error("Pattern {pattern} must start with '/'")]
    NotAbsolute { pattern: String },

    #[error("Pattern {pattern} has an empty variable name in segment {segment}")]
    EmptyVariable { pattern: String, segment: usize },

    #[error("Pattern {pattern} has invalid variable name {name}")]
    InvalidVariable { pattern: String, name: String },

    #[error("Pattern {pattern} declares variable {name} more than once")]
    DuplicateVariable { pattern: String, name: String },

    /// Bracket-like or marker characters in a literal segment
    #[error("Pattern {pattern} has unexpected token {token:?} in segment {segment}")]
    UnexpectedToken {
        pattern: String,
        segment: usize,
        token: char,
    },

    #[error("Pattern {pattern} failed to compile: {reason}")]
    Compile { pattern: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Store endpoint unavailable
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Watch requested a revision that was already compacted away
    #[error("Required revision {revision} has been compacted")]
    Compacted { revision: i64 },

    #[error("Lease {0} not found")]
    LeaseNotFound(i64),

    /// The caller's context was cancelled before the call completed
    #[error("Store call cancelled")]
    Cancelled,

    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    /// Non-blocking local lock already held in this process
    #[error("Key {key} is locked locally")]
    LockedLocally { key: String },

    /// Rejected by the cool-off rate limiter
    #[error("Key {key} is cooling off")]
    CoolOff { key: String },

    #[error("Timed out after {waited:?} acquiring lock {key}")]
    Timeout { key: String, waited: Duration },

    /// Shared or per-lock session could not be obtained
    #[error("Session unavailable: {0}")]
    Session(String),

    /// Lock was lost before release (lease expired or key replaced)
    #[error("Lock {key} no longer held")]
    NotHeld { key: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}
