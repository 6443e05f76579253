//! XUnit reporter
//!
//! Writes a JUnit-compatible XML document with a single testsuite once the
//! run ends. Passed, failed and pending runnables each become a testcase.

use anyhow::Result;
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestSuite};
use std::time::Duration;
use tracing::warn;

use super::json::{Destination, ErrorEntry};
use super::stats::Stats;
use crate::models::{EventKind, EventSink, Failure, RunEvent, RunnableInfo};

pub const DEFAULT_SUITE_NAME: &str = "suite-engine";

/// Collects testcases and writes the XML report on `end`
#[derive(Debug)]
pub struct XunitReporter {
    suite_name: String,
    stats: Stats,
    cases: Vec<TestCase>,
    destination: Destination,
}

impl XunitReporter {
    pub fn new(destination: Destination) -> Self {
        Self {
            suite_name: DEFAULT_SUITE_NAME.to_string(),
            stats: Stats::new(),
            cases: Vec::new(),
            destination,
        }
    }

    pub fn suite_name(mut self, name: impl Into<String>) -> Self {
        self.suite_name = name.into();
        self
    }

    fn case(info: &RunnableInfo, status: TestCaseStatus) -> TestCase {
        let classname = info
            .full_title
            .strip_suffix(info.title.as_str())
            .unwrap_or(&info.full_title)
            .trim_end();
        let mut case = TestCase::new(info.title.as_str(), status);
        case.set_classname(classname)
            .set_time(Duration::from_millis(info.duration_ms.unwrap_or(0)));
        case
    }

    fn failed(info: &RunnableInfo, failure: &Failure) -> TestCase {
        let mut status = TestCaseStatus::non_success(NonSuccessKind::Failure);
        status.set_message(failure.message());
        if let Some(kind) = ErrorEntry::from(failure).kind {
            status.set_type(kind);
        }
        if let Some(stack) = failure.stack() {
            status.set_description(stack);
        }
        Self::case(info, status)
    }

    fn write(&mut self) -> Result<()> {
        let mut suite = TestSuite::new(self.suite_name.as_str());
        if let Some(start) = self.stats.start {
            suite.set_timestamp(start);
        }
        suite
            .set_time(Duration::from_millis(self.stats.duration_ms.unwrap_or(0)))
            .add_test_cases(self.cases.drain(..));

        let mut report = Report::new(self.suite_name.as_str());
        report.add_test_suite(suite);

        let mut xml = Vec::new();
        report.serialize(&mut xml)?;
        let mut content = String::from_utf8(xml)?;
        content.push('\n');
        self.destination.write_all(&content)
    }
}

impl EventSink for XunitReporter {
    fn emit(&mut self, event: &RunEvent) {
        self.stats.record(event);
        match &event.kind {
            EventKind::Pass { test } => {
                self.cases.push(Self::case(test, TestCaseStatus::success()));
            }
            EventKind::Pending { test } => {
                self.cases.push(Self::case(test, TestCaseStatus::skipped()));
            }
            EventKind::Fail { runnable, error } => {
                self.cases.push(Self::failed(runnable, error));
            }
            EventKind::End { .. } => {
                if let Err(e) = self.write() {
                    warn!("Failed to write XUnit report: {:#}", e);
                }
            }
            _ => {}
        }
    }
}
