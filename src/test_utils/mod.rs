//! Shared helpers for unit tests.
mod common;
mod metrics;

pub use common::*;
pub use metrics::*;
