//! Suite execution engine
//!
//! Traversal, hook chains, retries, filters, leak detection and run control.

mod control;
mod execute;
mod filter;
mod globals;
mod runner;


use thiserror::Error;

pub use control::{AbortHandle, ReadyHandle, UncaughtHandle};
pub use filter::Filter;
pub use globals::{matches_allowed, GlobalScope, LeakDetector, PLATFORM_GLOBALS, RESERVED_PREFIX};
pub use runner::{Engine, EngineOptions, OUTSIDE_SUITE_TITLE};

/// Errors of the engine itself, as opposed to failures of runnables
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("delayed run was never started: ready handle dropped")]
    ReadyDropped,
}
