//! Suite Engine - hierarchical test-suite execution
//!
//! Runs a tree of suites, tests and hooks and reports every transition as an
//! event stream.
//!
//! ## Features
//!
//! - before/after hooks at suite and test level with failure propagation
//! - retries, bail, abort and timeouts
//! - pattern, exclusion, shard and exclusivity filters
//! - global leak detection and uncaught error attribution
//! - console, JSON and JSON-lines reporters
//!
//! ## Usage
//!
//! ```no_run
//! use suite_engine::executor::{Engine, EngineOptions};
//! use suite_engine::models::{Body, EventLog, SuiteTree};
//!
//! # async fn demo() -> Result<(), suite_engine::executor::EngineError> {
//! let mut tree = SuiteTree::new("");
//! let root = tree.root();
//! let cache = tree.add_suite(root, "cache");
//! tree.it(cache, "stores entries", Body::sync(|_| Ok(())));
//!
//! let log = EventLog::new();
//! let failures = Engine::new(tree, EngineOptions::default(), log.clone())
//!     .run()
//!     .await?;
//! assert_eq!(failures, 0);
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod executor;
pub mod models;
pub mod output;
pub mod plan;
pub mod utils;
