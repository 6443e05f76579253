//! Reporters
//!
//! Event sinks turning the run event stream into console text, JSON or XUnit
//! documents, or aggregate statistics.

mod console;
mod json;
mod stats;
mod xunit;

use std::path::Path;

pub use console::{ConsoleReporter, DEFAULT_SLOW_MS};
pub use json::{Destination, ErrorEntry, JsonReport, JsonReporter, JsonStreamReporter, ReportEntry};
pub use stats::{Stats, StatsCollector};
pub use xunit::{XunitReporter, DEFAULT_SUITE_NAME};

use crate::models::{EventSink, RunEvent};

/// Reporter selection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ReporterKind {
    #[default]
    Console,
    Json,
    JsonStream,
    Xunit,
    Silent,
}

impl ReporterKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "console" | "tree" => Some(ReporterKind::Console),
            "json" => Some(ReporterKind::Json),
            "json-stream" | "jsonstream" => Some(ReporterKind::JsonStream),
            "xunit" | "junit" => Some(ReporterKind::Xunit),
            "silent" | "none" => Some(ReporterKind::Silent),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ReporterKind::Console => "console",
            ReporterKind::Json => "json",
            ReporterKind::JsonStream => "json-stream",
            ReporterKind::Xunit => "xunit",
            ReporterKind::Silent => "silent",
        }
    }

    /// Build the sink; `output` redirects file-capable reporters
    pub fn build(&self, output: Option<&Path>, colorize: bool) -> Box<dyn EventSink> {
        match self {
            ReporterKind::Console => {
                let reporter = ConsoleReporter::stdout();
                if colorize {
                    Box::new(reporter)
                } else {
                    Box::new(reporter.no_color())
                }
            }
            ReporterKind::Json => Box::new(JsonReporter::new(Destination::from_path(output))),
            ReporterKind::JsonStream => {
                Box::new(JsonStreamReporter::new(Destination::from_path(output)))
            }
            ReporterKind::Xunit => Box::new(XunitReporter::new(Destination::from_path(output))),
            ReporterKind::Silent => Box::new(|_: &RunEvent| {}),
        }
    }
}

impl std::fmt::Display for ReporterKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reporter_kind_from_str() {
        assert_eq!(ReporterKind::from_str("tree"), Some(ReporterKind::Console));
        assert_eq!(ReporterKind::from_str("JSON"), Some(ReporterKind::Json));
        assert_eq!(ReporterKind::from_str("json-stream"), Some(ReporterKind::JsonStream));
        assert_eq!(ReporterKind::from_str("none"), Some(ReporterKind::Silent));
        assert_eq!(ReporterKind::from_str("junit"), Some(ReporterKind::Xunit));
        assert_eq!(ReporterKind::Xunit.name(), "xunit");
        assert_eq!(ReporterKind::from_str("tap"), None);
        assert_eq!(ReporterKind::JsonStream.to_string(), "json-stream");
    }
}
