use std::time::Duration;

// -
// Patterns

/// Leading character of a variable segment
pub(crate) const VARIABLE_MARKER: char = ':';

/// Substituted for unbound variables by lenient formatting
pub const UNRESOLVED_ATTRIBUTE: &str = "<nil>";

// -
// Work item metadata

pub const METADATA_SOURCE: &str = "source";
pub const SOURCE_WATCHER: &str = "watcher";
pub const SOURCE_CRAWLER: &str = "crawler";

// -
// Crawler

/// Hard upper bound on a single crawl cycle
pub(crate) const CRAWL_CYCLE_HARD_TIMEOUT: Duration = Duration::from_secs(15 * 60);

// -
// Locker names, used as metric labels

pub(crate) const LOCKER_MAP: &str = "map";
pub(crate) const LOCKER_STORE: &str = "store";
pub(crate) const LOCKER_SHARED_SESSION: &str = "shared_session";
pub(crate) const LOCKER_NESTED: &str = "nested";
pub(crate) const LOCKER_COOL_OFF: &str = "cool_off";

pub(crate) const METHOD_WORKER: &str = "worker";
pub(crate) const METHOD_CRAWLER: &str = "crawler";

// -
// Satisfied-then-not stages

pub const STAGE_BEFORE_LOCK: &str = "before_lock";
pub const STAGE_AFTER_LOCK: &str = "after_lock";
