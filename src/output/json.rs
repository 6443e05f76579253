//! JSON reporters
//!
//! `JsonReporter` writes one document when the run ends; `JsonStreamReporter`
//! writes every event as its own line while the run progresses.

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::warn;

use super::stats::Stats;
use crate::models::{EventKind, EventSink, Failure, RunEvent, RunnableInfo};

/// Where a reporter writes
#[derive(Clone, Debug)]
pub enum Destination {
    Stdout,
    /// Parent directories are created on write
    File(PathBuf),
    /// Shared buffer, mostly for embedding and tests
    Memory(Arc<Mutex<Vec<u8>>>),
}

impl Destination {
    pub fn from_path(path: Option<&Path>) -> Self {
        match path {
            Some(path) => Destination::File(path.to_path_buf()),
            None => Destination::Stdout,
        }
    }

    pub(crate) fn write_all(&self, content: &str) -> Result<()> {
        match self {
            Destination::Stdout => {
                let mut stdout = std::io::stdout().lock();
                stdout.write_all(content.as_bytes())?;
                stdout.flush()?;
            }
            Destination::File(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
                std::fs::write(path, content)
                    .with_context(|| format!("Failed to write report: {}", path.display()))?;
            }
            Destination::Memory(buffer) => {
                buffer
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .extend_from_slice(content.as_bytes());
            }
        }
        Ok(())
    }

    fn append(&self, content: &str) -> Result<()> {
        match self {
            Destination::File(path) => {
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .with_context(|| format!("Failed to open report: {}", path.display()))?;
                file.write_all(content.as_bytes())?;
                Ok(())
            }
            other => other.write_all(content),
        }
    }
}

/// Error details of a report entry; empty when the runnable did not fail
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl From<&Failure> for ErrorEntry {
    fn from(failure: &Failure) -> Self {
        let kind = serde_json::to_value(failure)
            .ok()
            .and_then(|v| v.get("kind").and_then(|k| k.as_str()).map(String::from));
        Self {
            kind,
            message: Some(failure.message()),
            stack: failure.stack().map(String::from),
        }
    }
}

/// One test or hook in the report
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportEntry {
    pub title: String,
    pub full_title: String,
    pub duration: Option<u64>,
    pub current_retry: u32,
    pub err: ErrorEntry,
}

impl ReportEntry {
    fn new(info: &RunnableInfo, error: Option<&Failure>) -> Self {
        Self {
            title: info.title.clone(),
            full_title: info.full_title.clone(),
            duration: info.duration_ms,
            current_retry: info.current_retry,
            err: error.or(info.error.as_ref()).map(Into::into).unwrap_or_default(),
        }
    }
}

/// The document written at the end of a run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct JsonReport {
    pub stats: Stats,
    pub tests: Vec<ReportEntry>,
    pub pending: Vec<ReportEntry>,
    pub failures: Vec<ReportEntry>,
    pub passes: Vec<ReportEntry>,
}

impl JsonReport {
    pub fn record(&mut self, event: &RunEvent) {
        self.stats.record(event);
        match &event.kind {
            EventKind::TestEnd { test } => self.tests.push(ReportEntry::new(test, None)),
            EventKind::Pass { test } => self.passes.push(ReportEntry::new(test, None)),
            EventKind::Pending { test } => self.pending.push(ReportEntry::new(test, None)),
            EventKind::Fail { runnable, error } => {
                self.failures.push(ReportEntry::new(runnable, Some(error)))
            }
            _ => {}
        }
    }
}

/// Collects the run and writes a [`JsonReport`] on `end`
#[derive(Debug)]
pub struct JsonReporter {
    report: JsonReport,
    destination: Destination,
}

impl JsonReporter {
    pub fn new(destination: Destination) -> Self {
        Self {
            report: JsonReport::default(),
            destination,
        }
    }

    pub fn report(&self) -> &JsonReport {
        &self.report
    }

    fn write(&self) -> Result<()> {
        let mut content = serde_json::to_string_pretty(&self.report)?;
        content.push('\n');
        self.destination.write_all(&content)
    }
}

impl EventSink for JsonReporter {
    fn emit(&mut self, event: &RunEvent) {
        self.report.record(event);
        if matches!(event.kind, EventKind::End { .. }) {
            if let Err(e) = self.write() {
                warn!("Failed to write JSON report: {:#}", e);
            }
        }
    }
}

/// Writes each event as one JSON line
#[derive(Debug)]
pub struct JsonStreamReporter {
    destination: Destination,
}

impl JsonStreamReporter {
    pub fn new(destination: Destination) -> Self {
        Self { destination }
    }
}

impl EventSink for JsonStreamReporter {
    fn emit(&mut self, event: &RunEvent) {
        let line = match serde_json::to_string(event) {
            Ok(line) => line + "\n",
            Err(e) => {
                warn!("Failed to serialize event: {}", e);
                return;
            }
        };
        if let Err(e) = self.destination.append(&line) {
            warn!("Failed to write event: {:#}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Engine, EngineOptions};
    use crate::models::{Body, HookPhase, SuiteTree, TestDef};

    fn tree() -> SuiteTree {
        let mut tree = SuiteTree::new("");
        let root = tree.root();
        let suite = tree.add_suite(root, "parser");
        tree.hook(
            suite,
            HookPhase::AfterAll,
            Body::sync(|_| Err(Failure::assertion("cleanup failed").into())),
        );
        tree.it(suite, "reads numbers", Body::sync(|_| Ok(())));
        tree.add_test(
            suite,
            TestDef::new(
                "reads strings",
                Body::sync(|_| Err(Failure::assertion("unterminated").into())),
            ),
        );
        tree.add_test(suite, TestDef::todo("reads comments"));
        tree
    }

    #[tokio::test]
    async fn test_json_report_sections() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let reporter = JsonReporter::new(Destination::Memory(buffer.clone()));
        let failures = Engine::new(tree(), EngineOptions::default(), reporter)
            .run()
            .await
            .unwrap();
        assert_eq!(failures, 2);

        let written = buffer.lock().unwrap().clone();
        let report: JsonReport = serde_json::from_slice(&written).unwrap();
        assert_eq!(report.stats.tests, 3);
        assert_eq!(report.tests.len(), 3);
        assert_eq!(report.passes.len(), 1);
        assert_eq!(report.pending.len(), 1);
        assert_eq!(report.failures.len(), 2);

        let failed = &report.failures[0];
        assert_eq!(failed.full_title, "parser reads strings");
        assert_eq!(failed.err.message.as_deref(), Some("unterminated"));
        assert_eq!(failed.err.kind.as_deref(), Some("assertion"));
        assert_eq!(report.failures[1].title, "\"after all\" hook");
        assert_eq!(report.passes[0].err, ErrorEntry::default());
    }

    #[tokio::test]
    async fn test_json_report_to_nested_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reports/nested/run.json");
        let reporter = JsonReporter::new(Destination::from_path(Some(path.as_path())));
        Engine::new(tree(), EngineOptions::default(), reporter)
            .run()
            .await
            .unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(json["stats"]["passes"], 1);
        assert_eq!(json["tests"][0]["fullTitle"], "parser reads numbers");
        assert_eq!(json["tests"][0]["currentRetry"], 0);
        assert_eq!(json["passes"][0]["err"], serde_json::json!({}));
    }

    #[tokio::test]
    async fn test_json_stream_writes_one_line_per_event() {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let reporter = JsonStreamReporter::new(Destination::Memory(buffer.clone()));
        Engine::new(tree(), EngineOptions::default(), reporter)
            .run()
            .await
            .unwrap();

        let written = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        let lines: Vec<serde_json::Value> = written
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines.first().unwrap()["event"], "start");
        assert_eq!(lines.last().unwrap()["event"], "end");
        assert_eq!(lines.last().unwrap()["failures"], 2);
    }
}
