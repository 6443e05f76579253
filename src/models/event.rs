//! Run event models
//!
//! The ordered stream a run produces. Reporters only ever see these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use super::failure::Failure;
use super::runnable::{HookPhase, RunState, RunnableId};
use super::suite::SuiteId;

/// One event of a run, stamped when it was emitted
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunEvent {
    pub timestamp: DateTime<Utc>,
    /// Time since the engine was created
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Event kinds, in the vocabulary reporters expect
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum EventKind {
    Start { total: usize },
    End { failures: usize },
    /// Delay mode: waiting for the ready signal
    Waiting { suite: SuiteInfo },
    Suite { suite: SuiteInfo },
    SuiteEnd { suite: SuiteInfo },
    Test { test: RunnableInfo },
    TestEnd { test: RunnableInfo },
    Hook { hook: RunnableInfo },
    HookEnd { hook: RunnableInfo },
    Pass { test: RunnableInfo },
    Fail { runnable: RunnableInfo, error: Failure },
    Pending { test: RunnableInfo },
}

impl EventKind {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Start { .. } => "start",
            EventKind::End { .. } => "end",
            EventKind::Waiting { .. } => "waiting",
            EventKind::Suite { .. } => "suite",
            EventKind::SuiteEnd { .. } => "suite end",
            EventKind::Test { .. } => "test",
            EventKind::TestEnd { .. } => "test end",
            EventKind::Hook { .. } => "hook",
            EventKind::HookEnd { .. } => "hook end",
            EventKind::Pass { .. } => "pass",
            EventKind::Fail { .. } => "fail",
            EventKind::Pending { .. } => "pending",
        }
    }

    /// Title of the suite or runnable the event is about
    pub fn subject(&self) -> Option<&str> {
        match self {
            EventKind::Start { .. } | EventKind::End { .. } => None,
            EventKind::Waiting { suite }
            | EventKind::Suite { suite }
            | EventKind::SuiteEnd { suite } => Some(&suite.title),
            EventKind::Test { test }
            | EventKind::TestEnd { test }
            | EventKind::Pass { test }
            | EventKind::Pending { test } => Some(&test.title),
            EventKind::Hook { hook } | EventKind::HookEnd { hook } => Some(&hook.title),
            EventKind::Fail { runnable, .. } => Some(&runnable.title),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Start { total } => write!(f, "start ({total})"),
            EventKind::End { failures } => write!(f, "end ({failures})"),
            EventKind::Fail { runnable, error } => {
                write!(f, "fail {}: {}", runnable.title, error)
            }
            other => match other.subject() {
                Some(subject) => write!(f, "{} {}", other.name(), subject),
                None => f.write_str(other.name()),
            },
        }
    }
}

/// Snapshot of a test or hook at the moment an event was emitted
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnableInfo {
    pub id: RunnableId,
    pub suite: SuiteId,
    /// Set for hooks
    pub phase: Option<HookPhase>,
    pub title: String,
    pub original_title: Option<String>,
    pub full_title: String,
    pub state: RunState,
    pub duration_ms: Option<u64>,
    pub current_retry: u32,
    pub retries: u32,
    pub error: Option<Failure>,
}

impl RunnableInfo {
    pub fn is_hook(&self) -> bool {
        self.phase.is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiteInfo {
    pub id: SuiteId,
    pub title: String,
    pub full_title: String,
    pub root: bool,
    /// Number of enclosing suites
    pub depth: usize,
}

/// Receiver of run events
pub trait EventSink: Send {
    fn emit(&mut self, event: &RunEvent);
}

impl<F> EventSink for F
where
    F: FnMut(&RunEvent) + Send,
{
    fn emit(&mut self, event: &RunEvent) {
        self(event)
    }
}

/// Forwards events over an unbounded channel
#[derive(Clone, Debug)]
pub struct ChannelSink(pub mpsc::UnboundedSender<RunEvent>);

impl EventSink for ChannelSink {
    fn emit(&mut self, event: &RunEvent) {
        // A dropped receiver only means nobody is listening anymore.
        let _ = self.0.send(event.clone());
    }
}

/// Shared in-memory record of every event
#[derive(Clone, Debug, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<RunEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Event names followed by their subject titles, in order
    pub fn trace(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|event| match event.kind.subject() {
                Some(subject) if !subject.is_empty() => {
                    format!("{} {}", event.kind.name(), subject)
                }
                _ => event.kind.name().to_string(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for EventLog {
    fn emit(&mut self, event: &RunEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event.clone());
    }
}

/// Forwards every event to several sinks in order
#[derive(Default)]
pub struct Fanout {
    sinks: Vec<Box<dyn EventSink>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl EventSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn push(&mut self, sink: Box<dyn EventSink>) {
        self.sinks.push(sink);
    }
}

impl EventSink for Fanout {
    fn emit(&mut self, event: &RunEvent) {
        for sink in &mut self.sinks {
            sink.emit(event);
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: EventKind) -> RunEvent {
        RunEvent {
            timestamp: Utc::now(),
            elapsed: Duration::from_millis(12),
            kind,
        }
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let json = serde_json::to_value(event(EventKind::Start { total: 3 })).unwrap();
        assert_eq!(json["event"], "start");
        assert_eq!(json["total"], 3);
        assert_eq!(json["elapsed"], 12);
    }

    #[test]
    fn test_fanout_reaches_every_sink() {
        let first = EventLog::new();
        let second = EventLog::new();
        let mut fanout = Fanout::new().with(first.clone()).with(second.clone());
        fanout.emit(&event(EventKind::End { failures: 0 }));
        assert_eq!(first.trace(), vec!["end"]);
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_channel_sink_ignores_closed_receiver() {
        let (tx, rx) = mpsc::unbounded_channel::<RunEvent>();
        drop(rx);
        ChannelSink(tx).emit(&event(EventKind::End { failures: 1 }));
    }

    #[test]
    fn test_closure_sink() {
        let mut names = Vec::new();
        {
            let mut sink = |e: &RunEvent| names.push(e.kind.name());
            EventSink::emit(&mut sink, &event(EventKind::Start { total: 0 }));
        }
        assert_eq!(names, vec!["start"]);
    }
}
