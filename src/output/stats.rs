//! Run statistics
//!
//! Counters derived from the event stream, shared by every reporter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

use crate::models::{EventKind, EventSink, RunEvent};

/// Aggregate counts of one run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Suites started, the root excluded
    pub suites: usize,
    /// Tests that reached `test end`
    pub tests: usize,
    pub passes: usize,
    pub pending: usize,
    /// Failed tests and hooks
    pub failures: usize,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Wall time between start and end in milliseconds
    #[serde(rename = "duration")]
    pub duration_ms: Option<u64>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one event into the counters
    pub fn record(&mut self, event: &RunEvent) {
        match &event.kind {
            EventKind::Start { .. } => self.start = Some(event.timestamp),
            EventKind::Suite { suite } if !suite.root => self.suites += 1,
            EventKind::TestEnd { .. } => self.tests += 1,
            EventKind::Pass { .. } => self.passes += 1,
            EventKind::Pending { .. } => self.pending += 1,
            EventKind::Fail { .. } => self.failures += 1,
            EventKind::End { .. } => {
                self.end = Some(event.timestamp);
                self.duration_ms = self
                    .start
                    .map(|start| (event.timestamp - start).num_milliseconds().max(0) as u64);
            }
            _ => {}
        }
    }

    /// Percentage of finished tests that passed
    pub fn pass_rate(&self) -> f64 {
        if self.tests == 0 {
            0.0
        } else {
            (self.passes as f64 / self.tests as f64) * 100.0
        }
    }

    pub fn is_all_passed(&self) -> bool {
        self.failures == 0
    }
}

/// Event sink keeping [`Stats`] up to date behind a shared handle
#[derive(Clone, Debug, Default)]
pub struct StatsCollector {
    stats: Arc<Mutex<Stats>>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the counters so far
    pub fn snapshot(&self) -> Stats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl EventSink for StatsCollector {
    fn emit(&mut self, event: &RunEvent) {
        self.stats
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .record(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Engine, EngineOptions};
    use crate::models::{Body, Failure, SuiteTree, TestDef};

    #[tokio::test]
    async fn test_stats_from_run() {
        let mut tree = SuiteTree::new("");
        let root = tree.root();
        let suite = tree.add_suite(root, "math");
        tree.it(suite, "adds", Body::sync(|_| Ok(())));
        tree.it(
            suite,
            "divides",
            Body::sync(|_| Err(Failure::assertion("division by zero").into())),
        );
        tree.add_test(suite, TestDef::todo("multiplies"));

        let collector = StatsCollector::new();
        Engine::new(tree, EngineOptions::default(), collector.clone())
            .run()
            .await
            .unwrap();

        let stats = collector.snapshot();
        assert_eq!(stats.suites, 1);
        assert_eq!(stats.tests, 3);
        assert_eq!(stats.passes, 1);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.failures, 1);
        assert!(stats.start.is_some());
        assert!(stats.duration_ms.is_some());
        assert!(!stats.is_all_passed());
        assert!((stats.pass_rate() - 33.3).abs() < 0.1);
    }

    #[test]
    fn test_empty_stats() {
        let stats = Stats::new();
        assert_eq!(stats.pass_rate(), 0.0);
        assert!(stats.is_all_passed());
        let json = serde_json::to_value(&stats).unwrap();
        assert!(json.get("duration").is_some());
    }
}
