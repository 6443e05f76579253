//! Console reporter
//!
//! Prints the suite hierarchy as it runs and a failure summary at the end.

use std::io::Write;
use tracing::warn;

use super::stats::Stats;
use crate::models::{EventKind, EventSink, Failure, RunEvent, RunnableInfo};

/// Duration in milliseconds above which a test counts as slow
pub const DEFAULT_SLOW_MS: u64 = 75;

const GREEN: &str = "32";
const RED: &str = "31";
const YELLOW: &str = "33";
const CYAN: &str = "36";
const GREY: &str = "90";

/// Human-readable reporter writing to a terminal or any writer
pub struct ConsoleReporter {
    out: Box<dyn Write + Send>,
    colorize: bool,
    slow_ms: u64,
    level: usize,
    stats: Stats,
    failures: Vec<(RunnableInfo, Failure)>,
}

impl ConsoleReporter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out,
            colorize: true,
            slow_ms: DEFAULT_SLOW_MS,
            level: 0,
            stats: Stats::new(),
            failures: Vec::new(),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(std::io::stdout()))
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    pub fn slow(mut self, ms: u64) -> Self {
        self.slow_ms = ms;
        self
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.colorize {
            format!("\x1b[{}m{}\x1b[0m", code, text)
        } else {
            text.to_string()
        }
    }

    fn indent(&self) -> String {
        "  ".repeat(self.level)
    }

    fn line(&mut self, text: &str) {
        if let Err(e) = writeln!(self.out, "{}", text) {
            warn!("Failed to write report: {}", e);
        }
    }

    fn format_pass(&self, test: &RunnableInfo) -> String {
        let check = self.paint(GREEN, "✓");
        let title = self.paint(GREY, &test.title);
        match test.duration_ms {
            Some(ms) if ms > self.slow_ms => {
                format!("{}  {} {} {}", self.indent(), check, title, self.paint(RED, &format!("({}ms)", ms)))
            }
            Some(ms) if ms > self.slow_ms / 2 => {
                format!("{}  {} {} {}", self.indent(), check, title, self.paint(YELLOW, &format!("({}ms)", ms)))
            }
            _ => format!("{}  {} {}", self.indent(), check, title),
        }
    }

    fn epilogue(&mut self) {
        let duration = self.stats.duration_ms.unwrap_or(0);
        self.line("");
        let passing = self.paint(GREEN, &format!("{} passing", self.stats.passes));
        let elapsed = self.paint(GREY, &format!("({}ms)", duration));
        self.line(&format!("  {} {}", passing, elapsed));

        if self.stats.pending > 0 {
            let pending = self.paint(CYAN, &format!("{} pending", self.stats.pending));
            self.line(&format!("  {}", pending));
        }

        if self.stats.failures > 0 {
            let failing = self.paint(RED, &format!("{} failing", self.stats.failures));
            self.line(&format!("  {}", failing));
            self.line("");

            let failures = std::mem::take(&mut self.failures);
            for (n, (runnable, error)) in failures.iter().enumerate() {
                self.line(&format!("  {}) {}:", n + 1, runnable.full_title));
                let message = self.paint(RED, &error.message());
                self.line(&format!("     {}", message));
                if let Some(stack) = error.stack() {
                    for frame in stack.lines() {
                        let frame = self.paint(GREY, frame);
                        self.line(&format!("      {}", frame));
                    }
                }
                self.line("");
            }
        }
        if let Err(e) = self.out.flush() {
            warn!("Failed to flush report: {}", e);
        }
    }
}

impl EventSink for ConsoleReporter {
    fn emit(&mut self, event: &RunEvent) {
        self.stats.record(event);
        match &event.kind {
            EventKind::Start { .. } => self.line(""),
            EventKind::Suite { suite } if !suite.root => {
                self.level += 1;
                let line = format!("{}{}", self.indent(), suite.title);
                self.line(&line);
            }
            EventKind::SuiteEnd { suite } if !suite.root => {
                self.level = self.level.saturating_sub(1);
                if self.level == 0 {
                    self.line("");
                }
            }
            EventKind::Pending { test } => {
                let line = format!("{}  {}", self.indent(), self.paint(CYAN, &format!("- {}", test.title)));
                self.line(&line);
            }
            EventKind::Pass { test } => {
                let line = self.format_pass(test);
                self.line(&line);
            }
            EventKind::Fail { runnable, error } => {
                self.failures.push((runnable.clone(), error.clone()));
                let label = format!("{}) {}", self.failures.len(), runnable.title);
                let line = format!("{}  {}", self.indent(), self.paint(RED, &label));
                self.line(&line);
            }
            EventKind::End { .. } => self.epilogue(),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Engine, EngineOptions};
    use crate::models::{Body, SuiteTree, TestDef};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Buffer {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    #[tokio::test]
    async fn test_console_output_without_color() {
        let mut tree = SuiteTree::new("");
        let root = tree.root();
        let outer = tree.add_suite(root, "cache");
        tree.it(outer, "stores entries", Body::sync(|_| Ok(())));
        let inner = tree.add_suite(outer, "eviction");
        tree.it(
            inner,
            "drops oldest",
            Body::sync(|_| {
                Err(Failure::Assertion {
                    message: "expected 2 entries".into(),
                    stack: Some("at evict\nat insert".into()),
                }
                .into())
            }),
        );
        tree.add_test(inner, TestDef::todo("respects pins"));

        let buffer = Buffer::default();
        let reporter = ConsoleReporter::new(Box::new(buffer.clone())).no_color();
        Engine::new(tree, EngineOptions::default(), reporter)
            .run()
            .await
            .unwrap();

        let text = buffer.text();
        assert!(text.contains("\n  cache\n"));
        assert!(text.contains("    ✓ stores entries"));
        assert!(text.contains("    eviction\n"));
        assert!(text.contains("      1) drops oldest"));
        assert!(text.contains("      - respects pins"));
        assert!(text.contains("  1 passing ("));
        assert!(text.contains("  1 pending"));
        assert!(text.contains("  1 failing"));
        assert!(text.contains("  1) cache eviction drops oldest:\n     expected 2 entries"));
        assert!(text.contains("      at evict\n      at insert"));
        assert!(!text.contains("\x1b["));
    }

    #[tokio::test]
    async fn test_console_colors_passes() {
        let mut tree = SuiteTree::new("");
        let root = tree.root();
        tree.it(root, "plain", Body::sync(|_| Ok(())));

        let buffer = Buffer::default();
        Engine::new(tree, EngineOptions::default(), ConsoleReporter::new(Box::new(buffer.clone())))
            .run()
            .await
            .unwrap();

        let text = buffer.text();
        assert!(text.contains("\x1b[32m✓\x1b[0m"));
        assert!(!text.contains("failing"));
    }
}
