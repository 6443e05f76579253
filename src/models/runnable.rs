//! Runnable models
//!
//! A runnable is the schedulable unit of work: a test or a hook.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use super::body::Body;
use super::failure::Failure;
use super::suite::SuiteId;

/// Index of a runnable inside its [`SuiteTree`](super::SuiteTree)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RunnableId(pub(crate) usize);

/// Lifecycle state of a runnable
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    #[default]
    Unstarted,
    Passed,
    Failed,
    Pending,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Unstarted => write!(f, "unstarted"),
            RunState::Passed => write!(f, "passed"),
            RunState::Failed => write!(f, "failed"),
            RunState::Pending => write!(f, "pending"),
        }
    }
}

/// Suite lifecycle phase a hook is bound to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum HookPhase {
    BeforeAll,
    BeforeEach,
    AfterAll,
    AfterEach,
}

impl HookPhase {
    /// Human label used in hook titles
    pub fn label(&self) -> &'static str {
        match self {
            HookPhase::BeforeAll => "before all",
            HookPhase::BeforeEach => "before each",
            HookPhase::AfterAll => "after all",
            HookPhase::AfterEach => "after each",
        }
    }

    /// Runs once per test rather than once per suite
    pub fn is_each(&self) -> bool {
        matches!(self, HookPhase::BeforeEach | HookPhase::AfterEach)
    }

    pub fn all() -> [HookPhase; 4] {
        [
            HookPhase::BeforeAll,
            HookPhase::BeforeEach,
            HookPhase::AfterAll,
            HookPhase::AfterEach,
        ]
    }

    pub fn from_str(s: &str) -> Option<HookPhase> {
        match s.to_lowercase().replace(['-', '_', ' '], "").as_str() {
            "beforeall" | "before" => Some(HookPhase::BeforeAll),
            "beforeeach" => Some(HookPhase::BeforeEach),
            "afterall" | "after" => Some(HookPhase::AfterAll),
            "aftereach" => Some(HookPhase::AfterEach),
            _ => None,
        }
    }
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Variant-specific part of a runnable
#[derive(Clone, Debug)]
pub enum RunnableKind {
    Test {
        /// Skip marker set at declaration time
        pending: bool,
        shard: Option<u32>,
        /// The declared test this attempt retries
        retry_of: Option<RunnableId>,
    },
    Hook {
        phase: HookPhase,
        /// Title before it was rewritten to mention a test
        original_title: Option<String>,
        /// Test the hook is currently running for
        current_test: Option<RunnableId>,
        /// Set when a suite-level hook signalled skip; it will not run again
        pending: bool,
    },
}

/// A test or hook together with its run bookkeeping
#[derive(Clone, Debug)]
pub struct Runnable {
    pub(crate) title: String,
    pub(crate) parent: SuiteId,
    pub(crate) body: Option<Body>,
    pub(crate) timeout: Duration,
    pub(crate) retries: u32,
    pub(crate) current_retry: u32,
    pub(crate) state: RunState,
    pub(crate) duration: Option<Duration>,
    pub(crate) error: Option<Failure>,
    pub(crate) allowed_globals: Vec<String>,
    pub(crate) kind: RunnableKind,
}

impl Runnable {
    pub(crate) fn test(def: TestDef, parent: SuiteId, timeout: Duration, retries: u32) -> Self {
        Self {
            title: def.title,
            parent,
            body: def.body,
            timeout: def.timeout.unwrap_or(timeout),
            retries: def.retries.unwrap_or(retries),
            current_retry: 0,
            state: RunState::Unstarted,
            duration: None,
            error: None,
            allowed_globals: def.allowed_globals,
            kind: RunnableKind::Test {
                pending: def.pending || def.body_missing,
                shard: def.shard,
                retry_of: None,
            },
        }
    }

    pub(crate) fn hook(def: HookDef, parent: SuiteId, timeout: Duration) -> Self {
        let title = match &def.name {
            Some(name) => format!("\"{}\" hook: {}", def.phase.label(), name),
            None => format!("\"{}\" hook", def.phase.label()),
        };
        Self {
            title,
            parent,
            body: Some(def.body),
            timeout: def.timeout.unwrap_or(timeout),
            retries: 0,
            current_retry: 0,
            state: RunState::Unstarted,
            duration: None,
            error: None,
            allowed_globals: def.allowed_globals,
            kind: RunnableKind::Hook {
                phase: def.phase,
                original_title: None,
                current_test: None,
                pending: false,
            },
        }
    }

    /// Bare runnable used to carry failures that belong to no test
    pub(crate) fn detached(title: impl Into<String>, parent: SuiteId) -> Self {
        Self {
            title: title.into(),
            parent,
            body: None,
            timeout: Duration::ZERO,
            retries: 0,
            current_retry: 0,
            state: RunState::Unstarted,
            duration: None,
            error: None,
            allowed_globals: Vec::new(),
            kind: RunnableKind::Test {
                pending: false,
                shard: None,
                retry_of: None,
            },
        }
    }

    /// Fresh attempt of a test for retry scheduling.
    ///
    /// Same title, body, suite and retry configuration; state is reset and the
    /// retry counter is one higher. Hooks are never retried.
    pub fn clone_for_retry(&self, id: RunnableId) -> Option<Runnable> {
        let RunnableKind::Test {
            pending,
            shard,
            retry_of,
        } = &self.kind
        else {
            return None;
        };
        Some(Runnable {
            title: self.title.clone(),
            parent: self.parent,
            body: self.body.clone(),
            timeout: self.timeout,
            retries: self.retries,
            current_retry: self.current_retry + 1,
            state: RunState::Unstarted,
            duration: None,
            error: None,
            allowed_globals: self.allowed_globals.clone(),
            kind: RunnableKind::Test {
                pending: *pending,
                shard: *shard,
                retry_of: Some(retry_of.unwrap_or(id)),
            },
        })
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Title as declared, before any failure rewrite
    pub fn original_title(&self) -> &str {
        match &self.kind {
            RunnableKind::Hook {
                original_title: Some(original),
                ..
            } => original,
            _ => &self.title,
        }
    }

    pub fn parent(&self) -> SuiteId {
        self.parent
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn current_retry(&self) -> u32 {
        self.current_retry
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn error(&self) -> Option<&Failure> {
        self.error.as_ref()
    }

    pub fn kind(&self) -> &RunnableKind {
        &self.kind
    }

    pub fn allowed_globals(&self) -> &[String] {
        &self.allowed_globals
    }

    pub fn is_test(&self) -> bool {
        matches!(self.kind, RunnableKind::Test { .. })
    }

    pub fn is_hook(&self) -> bool {
        matches!(self.kind, RunnableKind::Hook { .. })
    }

    pub fn phase(&self) -> Option<HookPhase> {
        match self.kind {
            RunnableKind::Hook { phase, .. } => Some(phase),
            RunnableKind::Test { .. } => None,
        }
    }

    pub fn shard(&self) -> Option<u32> {
        match self.kind {
            RunnableKind::Test { shard, .. } => shard,
            RunnableKind::Hook { .. } => None,
        }
    }

    /// Own skip marker, ignoring enclosing suites
    pub fn is_marked_pending(&self) -> bool {
        match self.kind {
            RunnableKind::Test { pending, .. } | RunnableKind::Hook { pending, .. } => pending,
        }
    }

    pub(crate) fn set_pending(&mut self) {
        match &mut self.kind {
            RunnableKind::Test { pending, .. } | RunnableKind::Hook { pending, .. } => {
                *pending = true
            }
        }
    }

    pub fn has_body(&self) -> bool {
        self.body.is_some()
    }

    pub(crate) fn release_body(&mut self) {
        self.body = None;
    }
}

/// Declaration of a test
#[derive(Clone, Debug)]
pub struct TestDef {
    title: String,
    body: Option<Body>,
    body_missing: bool,
    pending: bool,
    timeout: Option<Duration>,
    retries: Option<u32>,
    shard: Option<u32>,
    allowed_globals: Vec<String>,
}

impl TestDef {
    pub fn new(title: impl Into<String>, body: Body) -> Self {
        Self {
            title: title.into(),
            body: Some(body),
            body_missing: false,
            pending: false,
            timeout: None,
            retries: None,
            shard: None,
            allowed_globals: Vec::new(),
        }
    }

    /// A test declared without a body is pending
    pub fn todo(title: impl Into<String>) -> Self {
        Self {
            body: None,
            body_missing: true,
            ..Self::new(title, Body::sync(|_| Ok(())))
        }
    }

    pub fn pending(mut self) -> Self {
        self.pending = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    pub fn shard(mut self, shard: u32) -> Self {
        self.shard = Some(shard);
        self
    }

    pub fn allow_global(mut self, name: impl Into<String>) -> Self {
        self.allowed_globals.push(name.into());
        self
    }
}

/// Declaration of a hook
#[derive(Clone, Debug)]
pub struct HookDef {
    phase: HookPhase,
    name: Option<String>,
    body: Body,
    timeout: Option<Duration>,
    allowed_globals: Vec<String>,
}

impl HookDef {
    pub fn new(phase: HookPhase, body: Body) -> Self {
        Self {
            phase,
            name: None,
            body,
            timeout: None,
            allowed_globals: Vec::new(),
        }
    }

    pub fn phase(&self) -> HookPhase {
        self.phase
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn allow_global(mut self, name: impl Into<String>) -> Self {
        self.allowed_globals.push(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_test() -> Runnable {
        let def = TestDef::new("adds", Body::sync(|_| Ok(())))
            .retries(2)
            .shard(1);
        Runnable::test(def, SuiteId(0), Duration::from_millis(2000), 0)
    }

    #[test]
    fn test_hook_titles() {
        let hook = Runnable::hook(
            HookDef::new(HookPhase::BeforeEach, Body::sync(|_| Ok(()))),
            SuiteId(0),
            Duration::ZERO,
        );
        assert_eq!(hook.title(), "\"before each\" hook");

        let hook = Runnable::hook(
            HookDef::new(HookPhase::AfterAll, Body::sync(|_| Ok(()))).named("teardown"),
            SuiteId(0),
            Duration::ZERO,
        );
        assert_eq!(hook.title(), "\"after all\" hook: teardown");
        assert_eq!(hook.original_title(), hook.title());
    }

    #[test]
    fn test_clone_for_retry_resets_state() {
        let mut test = sample_test();
        test.state = RunState::Failed;
        test.error = Some(Failure::assertion("boom"));
        test.duration = Some(Duration::from_millis(4));

        let retry = test.clone_for_retry(RunnableId(7)).unwrap();
        assert_eq!(retry.current_retry(), 1);
        assert_eq!(retry.retries(), 2);
        assert_eq!(retry.title(), "adds");
        assert_eq!(retry.state(), RunState::Unstarted);
        assert!(retry.error().is_none());
        assert!(retry.duration().is_none());
        assert_eq!(retry.shard(), Some(1));

        let again = retry.clone_for_retry(RunnableId(9)).unwrap();
        assert_eq!(again.current_retry(), 2);
        match again.kind() {
            RunnableKind::Test { retry_of, .. } => assert_eq!(*retry_of, Some(RunnableId(7))),
            RunnableKind::Hook { .. } => panic!("expected a test"),
        }
    }

    #[test]
    fn test_hooks_are_not_retried() {
        let hook = Runnable::hook(
            HookDef::new(HookPhase::BeforeAll, Body::sync(|_| Ok(()))),
            SuiteId(0),
            Duration::ZERO,
        );
        assert!(hook.clone_for_retry(RunnableId(0)).is_none());
    }

    #[test]
    fn test_todo_is_pending() {
        let test = Runnable::test(TestDef::todo("later"), SuiteId(0), Duration::ZERO, 0);
        assert!(test.is_marked_pending());
        assert!(!test.has_body());
    }

    #[test]
    fn test_phase_parsing() {
        assert_eq!(HookPhase::from_str("beforeEach"), Some(HookPhase::BeforeEach));
        assert_eq!(HookPhase::from_str("after_all"), Some(HookPhase::AfterAll));
        assert_eq!(HookPhase::from_str("before each"), Some(HookPhase::BeforeEach));
        assert_eq!(HookPhase::from_str("around"), None);
        assert!(HookPhase::AfterEach.is_each());
        assert!(!HookPhase::BeforeAll.is_each());
    }
}
