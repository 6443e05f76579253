//! Suite execution engine
//!
//! Walks a [`SuiteTree`] depth-first, runs hooks around tests, reschedules
//! retries, applies bail and abort, attributes uncaught errors, and reports
//! every transition to an [`EventSink`].

use chrono::Utc;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace};

use super::control::{AbortHandle, ReadyHandle, UncaughtHandle};
use super::execute::{run_body, Settled, Signals};
use crate::utils::timer::Timer;
use super::filter::Filter;
use super::globals::{GlobalScope, LeakDetector};
use super::EngineError;
use crate::models::{
    Context, ContextSeed, EventKind, EventSink, Failure, HookPhase, Raised, RunEvent, RunState,
    RunnableId, RunnableKind, SuiteId, SuiteTree,
};

/// Title of the synthetic runnable that carries errors raised outside any runnable
pub const OUTSIDE_SUITE_TITLE: &str = "Uncaught error outside test suite";

/// Behaviour switches of a run
#[derive(Clone, Debug, Default)]
pub struct EngineOptions {
    /// Stop scheduling after the first terminal failure (root default)
    pub bail: bool,
    /// Wait for [`ReadyHandle::ready`] before traversing
    pub delay: bool,
    /// Fail runnables that leave new global bindings behind
    pub check_leaks: bool,
    /// Extra allow-list entries, `*` suffix allowed
    pub allowed_globals: Vec<String>,
    /// Environment-specific allow-list entries
    pub extra_globals: Vec<String>,
    /// Treat exclusivity markers as failures instead of filtering
    pub forbid_only: bool,
    /// Treat pending tests as failures
    pub forbid_pending: bool,
    /// Reject bodies that complete synchronously
    pub async_only: bool,
}

impl EngineOptions {
    pub fn bail(mut self, bail: bool) -> Self {
        self.bail = bail;
        self
    }

    pub fn delay(mut self, delay: bool) -> Self {
        self.delay = delay;
        self
    }

    pub fn check_leaks(mut self, check_leaks: bool) -> Self {
        self.check_leaks = check_leaks;
        self
    }

    pub fn allow_global(mut self, name: impl Into<String>) -> Self {
        self.allowed_globals.push(name.into());
        self
    }

    pub fn forbid_only(mut self, forbid: bool) -> Self {
        self.forbid_only = forbid;
        self
    }

    pub fn forbid_pending(mut self, forbid: bool) -> Self {
        self.forbid_pending = forbid;
        self
    }

    pub fn async_only(mut self, async_only: bool) -> Self {
        self.async_only = async_only;
        self
    }
}

/// A hook chain stopped early
struct HookFailed;

/// Terminal outcome of one test attempt
enum Outcome {
    Passed,
    Pending,
    Failed(Failure),
}

impl From<Result<(), Raised>> for Outcome {
    fn from(result: Result<(), Raised>) -> Self {
        match result {
            Ok(()) => Outcome::Passed,
            Err(raised) => match raised.into_failure() {
                Some(failure) => Outcome::Failed(failure),
                None => Outcome::Pending,
            },
        }
    }
}

/// Executes one run over a suite tree.
///
/// An engine is single use: [`Engine::run`] consumes it.
pub struct Engine {
    tree: SuiteTree,
    options: EngineOptions,
    filter: Filter,
    sink: Box<dyn EventSink>,
    clock: Timer,
    /// Suite whose hooks or tests are running
    suite: SuiteId,
    /// Test the hooks currently run for
    test: Option<RunnableId>,
    /// Runnable uncaught errors are attributed to
    current: Option<RunnableId>,
    failures: usize,
    total: usize,
    started: bool,
    globals: GlobalScope,
    leaks: LeakDetector,
    abort: AbortHandle,
    abort_rx: watch::Receiver<bool>,
    uncaught: UncaughtHandle,
    uncaught_rx: mpsc::UnboundedReceiver<Failure>,
    ready: Option<ReadyHandle>,
    ready_rx: Option<oneshot::Receiver<()>>,
}

impl Engine {
    pub fn new(mut tree: SuiteTree, options: EngineOptions, sink: impl EventSink + 'static) -> Self {
        let root = tree.root();
        if options.bail && tree.suite(root).bail().is_none() {
            tree.set_bail(root, true);
        }
        let globals = GlobalScope::new();
        let leaks = Self::leak_detector(&globals, &options);
        let (abort, abort_rx) = AbortHandle::new();
        let (uncaught, uncaught_rx) = UncaughtHandle::new();
        let (ready, ready_rx) = ReadyHandle::new();
        let filter = Filter::new();
        let total = filter.total(&tree, root, true);
        Self {
            suite: root,
            tree,
            options,
            filter,
            sink: Box::new(sink),
            clock: Timer::start("run"),
            test: None,
            current: None,
            failures: 0,
            total,
            started: false,
            globals,
            leaks,
            abort,
            abort_rx,
            uncaught,
            uncaught_rx,
            ready: Some(ready),
            ready_rx: Some(ready_rx),
        }
    }

    fn leak_detector(scope: &GlobalScope, options: &EngineOptions) -> LeakDetector {
        let mut leaks = LeakDetector::new(scope, &options.extra_globals).enabled(options.check_leaks);
        leaks.allow(options.allowed_globals.iter().cloned());
        leaks
    }

    /// Run against an existing global scope; its current names are allowed.
    ///
    /// Names already added through [`Engine::globals`] stay allowed.
    pub fn with_scope(mut self, scope: GlobalScope) -> Self {
        let mut leaks = Self::leak_detector(&scope, &self.options);
        let carried: Vec<String> = self
            .leaks
            .allowed()
            .iter()
            .filter(|name| !leaks.allowed().contains(name))
            .cloned()
            .collect();
        leaks.allow(carried);
        self.leaks = leaks;
        self.globals = scope;
        self
    }

    /// Replace the selection filter and recompute the expected total
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self.total = self.filter.total(&self.tree, self.tree.root(), true);
        self
    }

    /// Number of tests the run expects
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn tree(&self) -> &SuiteTree {
        &self.tree
    }

    pub fn scope(&self) -> &GlobalScope {
        &self.globals
    }

    /// Extend the global allow-list; returns the full list
    pub fn globals<I, S>(&mut self, names: I) -> &[String]
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.leaks.allow(names)
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    pub fn uncaught_handle(&self) -> UncaughtHandle {
        self.uncaught.clone()
    }

    /// Handle that starts a delayed run. Only the first call returns it.
    pub fn ready_handle(&mut self) -> Option<ReadyHandle> {
        self.ready.take()
    }

    /// Run the tree; resolves to the number of terminal failures
    pub async fn run(mut self) -> Result<usize, EngineError> {
        debug!("start");
        let root = self.tree.root();
        let early = if self.options.delay {
            self.emit(EventKind::Waiting {
                suite: self.tree.suite_info(root),
            });
            // An unclaimed handle can never fire.
            drop(self.ready.take());
            let ready = self.ready_rx.take().ok_or(EngineError::ReadyDropped)?;
            tokio::select! {
                biased;
                Some(failure) = self.uncaught_rx.recv() => Some(failure),
                result = ready => {
                    result.map_err(|_| EngineError::ReadyDropped)?;
                    None
                }
            }
        } else {
            self.uncaught_rx.try_recv().ok()
        };

        if let Some(failure) = early {
            // Nothing can run once the suite tree is in doubt.
            self.emit(EventKind::Start { total: self.total });
            self.handle_uncaught(failure);
            self.emit(EventKind::End {
                failures: self.failures,
            });
            return Ok(self.failures);
        }

        self.start().await;
        Ok(self.failures)
    }

    async fn start(&mut self) {
        let root = self.tree.root();
        if !self.options.forbid_only && self.tree.has_only(root) {
            self.tree.filter_only(root);
            self.total = self.filter.total(&self.tree, root, true);
        }
        self.started = true;
        self.emit(EventKind::Start { total: self.total });
        self.run_suite(root).await;
        self.drain_uncaught();
        info!(
            "finished running: {} tests, {} failures in {}ms",
            self.total,
            self.failures,
            self.clock.elapsed_ms()
        );
        self.emit(EventKind::End {
            failures: self.failures,
        });
    }

    fn emit(&mut self, kind: EventKind) {
        trace!("event: {}", kind);
        let event = RunEvent {
            timestamp: Utc::now(),
            elapsed: self.clock.elapsed(),
            kind,
        };
        self.sink.emit(&event);
    }

    fn is_aborted(&self) -> bool {
        *self.abort_rx.borrow()
    }

    /// Run a suite and its descendants.
    ///
    /// Returns the suite whose hook chain failed when that suite is an
    /// ancestor that must stop as well.
    fn run_suite(&mut self, suite: SuiteId) -> BoxFuture<'_, Option<SuiteId>> {
        Box::pin(async move {
            let total = self.filter.total(&self.tree, suite, true);
            let runnable = self.filter.total(&self.tree, suite, false);
            let title = self.tree.suite_full_title(suite);

            if total == 0 || (self.failures > 0 && self.tree.bail_active(suite)) {
                debug!("skipping suite {:?}", title);
                self.tree.release_bodies_recursive(suite);
                return None;
            }

            debug!("run suite {:?}", title);
            self.suite = suite;
            self.emit(EventKind::Suite {
                suite: self.tree.suite_info(suite),
            });

            let mut propagate = None;
            let before_all = if runnable > 0 {
                self.hook(suite, HookPhase::BeforeAll).await
            } else {
                Ok(())
            };

            if before_all.is_ok() {
                let mut failed_in = self.run_tests(suite).await;
                let mut next = 0;
                loop {
                    if let Some(err_suite) = failed_in {
                        if err_suite != suite {
                            propagate = Some(err_suite);
                        }
                        break;
                    }
                    if self.is_aborted() {
                        break;
                    }
                    let Some(&child) = self.tree.suite(suite).suites().get(next) else {
                        break;
                    };
                    next += 1;
                    if self.filter.has_pattern() {
                        tokio::task::yield_now().await;
                    }
                    failed_in = self.run_suite(child).await;
                }
            }

            self.suite = suite;
            self.test = None;
            if runnable > 0 {
                // Failures here are reported but do not change traversal.
                let _ = self.hook(suite, HookPhase::AfterAll).await;
            }
            self.emit(EventKind::SuiteEnd {
                suite: self.tree.suite_info(suite),
            });
            self.tree.release_bodies(suite);
            propagate
        })
    }

    /// Run the tests of one suite, each wrapped by its each-hook chains
    async fn run_tests(&mut self, suite: SuiteId) -> Option<SuiteId> {
        let mut queue: VecDeque<RunnableId> =
            self.tree.suite(suite).tests().iter().copied().collect();
        let mut chain_failed: Option<SuiteId> = None;

        loop {
            if self.is_aborted() {
                return None;
            }
            if let Some(err_suite) = chain_failed.take() {
                return self.hook_err(err_suite, true).await;
            }
            if self.failures > 0 && self.tree.bail_active(suite) {
                debug!("bailing out of {:?}", self.tree.suite_full_title(suite));
                return None;
            }
            let Some(test) = queue.pop_front() else {
                return None;
            };

            if !self.filter.selects(&self.tree, test) {
                if self.filter.has_pattern() {
                    tokio::task::yield_now().await;
                }
                continue;
            }

            if self.tree.is_pending(test) {
                self.skip_test(test);
                continue;
            }

            // errors raised between runnables belong to what ran before
            self.drain_uncaught();
            self.test = Some(test);
            self.emit(EventKind::Test {
                test: self.tree.runnable_info(test),
            });

            let before_each = self.hooks_down(suite, HookPhase::BeforeEach).await;
            if self.tree.is_pending(test) {
                self.skip_test(test);
                continue;
            }
            if let Err(err_suite) = before_each {
                let failed_in = self.hook_err(err_suite, false).await;
                self.emit_test_end(test);
                return failed_in;
            }
            if self.is_aborted() {
                self.emit_test_end(test);
                return None;
            }

            let settled = self.run_test(test).await;
            match Outcome::from(settled.result) {
                Outcome::Pending => {
                    if self.options.forbid_pending {
                        self.record_failure(test, Failure::forbidden("Pending test forbidden"));
                    } else {
                        self.tree.runnable_mut(test).set_pending();
                        self.tree.runnable_mut(test).state = RunState::Pending;
                        self.emit(EventKind::Pending {
                            test: self.tree.runnable_info(test),
                        });
                    }
                    self.emit_test_end(test);
                }
                Outcome::Failed(failure) => {
                    let attempt = self.tree.runnable(test);
                    if attempt.current_retry() < attempt.retries() && !self.is_aborted() {
                        debug!(
                            "retrying {:?} ({}/{})",
                            attempt.title(),
                            attempt.current_retry() + 1,
                            attempt.retries()
                        );
                        let attempt = self.tree.runnable_mut(test);
                        attempt.state = RunState::Failed;
                        attempt.error = Some(failure);
                        if let Some(retry) = self.tree.push_retry(test) {
                            queue.push_front(retry);
                        }
                        chain_failed = self.hooks_up(suite, HookPhase::AfterEach).await.err();
                        continue;
                    }
                    self.fail(test, failure);
                    chain_failed = self.hooks_up(suite, HookPhase::AfterEach).await.err();
                    self.emit_test_end(test);
                }
                Outcome::Passed => {
                    self.tree.runnable_mut(test).state = RunState::Passed;
                    // afterEach hooks may still fail the test
                    chain_failed = self.hooks_up(suite, HookPhase::AfterEach).await.err();
                    if self.tree.runnable(test).state() == RunState::Passed {
                        self.emit(EventKind::Pass {
                            test: self.tree.runnable_info(test),
                        });
                    }
                    self.emit_test_end(test);
                }
            }
        }
    }

    /// Report a test that will not run
    fn skip_test(&mut self, test: RunnableId) {
        if self.options.forbid_pending {
            self.record_failure(test, Failure::forbidden("Pending test forbidden"));
        } else {
            self.tree.runnable_mut(test).state = RunState::Pending;
            self.emit(EventKind::Pending {
                test: self.tree.runnable_info(test),
            });
        }
        self.emit_test_end(test);
    }

    async fn run_test(&mut self, test: RunnableId) -> Settled {
        self.enter(test);
        if self.options.forbid_only && self.only_in_scope(test) {
            return Settled {
                result: Err(Failure::forbidden("`.only` forbidden").into()),
                duration: std::time::Duration::ZERO,
            };
        }
        let (settled, _) = self.execute(test).await;
        settled
    }

    /// Whether an exclusivity marker sits anywhere above `test`.
    ///
    /// Markers are stored on the parent of the marked node, so the walk
    /// has to reach the outermost ancestor.
    fn only_in_scope(&self, test: RunnableId) -> bool {
        let parent = self.tree.runnable(test).parent();
        let top = self.tree.parents(parent).last().copied().unwrap_or(parent);
        self.tree.has_only(top)
    }

    /// Run every hook of `phase` declared on `suite`.
    ///
    /// Before-hooks stop at the first failure; after-hooks all run and the
    /// chain reports failure once done.
    async fn hook(&mut self, suite: SuiteId, phase: HookPhase) -> Result<(), HookFailed> {
        self.suite = suite;
        let hooks = self.tree.suite(suite).hooks(phase).to_vec();
        let mut failed = false;

        for hook in hooks {
            if self.is_aborted() {
                break;
            }
            self.enter(hook);
            let current_test = self.test;
            {
                let runnable = self.tree.runnable_mut(hook);
                runnable.state = RunState::Unstarted;
                if let RunnableKind::Hook {
                    current_test: slot, ..
                } = &mut runnable.kind
                {
                    *slot = current_test;
                }
            }
            self.emit(EventKind::Hook {
                hook: self.tree.runnable_info(hook),
            });

            let (settled, ctx) = self.execute(hook).await;
            if let Some(test_error) = ctx.take_test_error() {
                if let Some(test) = self.test {
                    self.fail(test, test_error);
                }
            }

            match Outcome::from(settled.result) {
                Outcome::Passed => {
                    self.tree.runnable_mut(hook).state = RunState::Passed;
                }
                Outcome::Pending => {
                    if phase.is_each() {
                        if let Some(test) = self.test {
                            self.tree.runnable_mut(test).set_pending();
                        }
                    } else {
                        let tests = self.tree.suite(suite).tests().to_vec();
                        for test in tests {
                            self.tree.runnable_mut(test).set_pending();
                        }
                        // a pending suite hook does not run again
                        self.tree.runnable_mut(hook).set_pending();
                    }
                }
                Outcome::Failed(failure) => {
                    self.fail_hook(hook, failure);
                    if matches!(phase, HookPhase::BeforeAll | HookPhase::BeforeEach) {
                        self.emit_hook_end(hook);
                        return Err(HookFailed);
                    }
                    failed = true;
                }
            }
            self.emit_hook_end(hook);
        }

        if failed {
            Err(HookFailed)
        } else {
            Ok(())
        }
    }

    /// Run `phase` hooks from the root down to `suite`
    async fn hooks_down(&mut self, suite: SuiteId, phase: HookPhase) -> Result<(), SuiteId> {
        let mut chain = self.tree.parents(suite);
        chain.reverse();
        chain.push(suite);
        self.hooks(chain, phase).await
    }

    /// Run `phase` hooks from `suite` up to the root
    async fn hooks_up(&mut self, suite: SuiteId, phase: HookPhase) -> Result<(), SuiteId> {
        let mut chain = vec![suite];
        chain.extend(self.tree.parents(suite));
        self.hooks(chain, phase).await
    }

    async fn hooks(&mut self, chain: Vec<SuiteId>, phase: HookPhase) -> Result<(), SuiteId> {
        let orig = self.suite;
        for suite in chain {
            if self.hook(suite, phase).await.is_err() {
                self.suite = orig;
                return Err(suite);
            }
        }
        self.suite = orig;
        Ok(())
    }

    /// An each-hook of `err_suite` failed: give the remaining afterEach
    /// levels their chance to run and return the last suite that failed.
    async fn hook_err(&mut self, mut err_suite: SuiteId, mut after: bool) -> Option<SuiteId> {
        loop {
            let from = if after {
                self.tree.suite(err_suite).parent()
            } else {
                Some(err_suite)
            };
            let Some(from) = from else {
                return Some(err_suite);
            };
            match self.hooks_up(from, HookPhase::AfterEach).await {
                Ok(()) => return Some(err_suite),
                Err(failed) => {
                    err_suite = failed;
                    after = true;
                }
            }
        }
    }

    /// Make `id` the runnable uncaught errors are attributed to
    fn enter(&mut self, id: RunnableId) {
        self.drain_uncaught();
        self.current = Some(id);
    }

    async fn execute(&mut self, id: RunnableId) -> (Settled, Context) {
        let runnable = self.tree.runnable(id);
        let (ctx, done) = Context::new(ContextSeed {
            title: runnable.title().to_string(),
            attempt: runnable.current_retry(),
            current_test: self
                .test
                .map(|test| self.tree.runnable(test).title().to_string()),
            globals: self.globals.clone(),
            uncaught: self.uncaught.clone(),
            abort: self.abort.clone(),
        });
        let timeout = runnable.timeout();
        // pending hooks complete without running
        let body = if self.tree.is_pending(id) {
            None
        } else {
            runnable.body.clone()
        };

        let settled = run_body(
            body,
            ctx.clone(),
            done,
            timeout,
            self.options.async_only,
            Signals {
                uncaught: &mut self.uncaught_rx,
                abort: &mut self.abort_rx,
            },
        )
        .await;
        self.tree.runnable_mut(id).duration = Some(settled.duration);
        (settled, ctx)
    }

    /// Count a terminal failure and report it; pending runnables are ignored
    fn fail(&mut self, id: RunnableId, failure: Failure) {
        if self.tree.is_pending(id) {
            return;
        }
        self.record_failure(id, failure);
    }

    fn record_failure(&mut self, id: RunnableId, failure: Failure) {
        self.failures += 1;
        let runnable = self.tree.runnable_mut(id);
        runnable.state = RunState::Failed;
        runnable.error = Some(failure.clone());
        self.emit(EventKind::Fail {
            runnable: self.tree.runnable_info(id),
            error: failure,
        });
    }

    /// Fail a hook, naming the test it ran for in its title
    fn fail_hook(&mut self, hook: RunnableId, failure: Failure) {
        if let Some(test) = self.test {
            let test_title = self.tree.runnable(test).title().to_string();
            let runnable = self.tree.runnable_mut(hook);
            let declared = runnable.original_title().to_string();
            runnable.title = format!("{} for \"{}\"", declared, test_title);
            if let RunnableKind::Hook { original_title, .. } = &mut runnable.kind {
                *original_title = Some(declared);
            }
        }
        self.fail(hook, failure);
    }

    /// Attribute an error that escaped its runnable
    fn handle_uncaught(&mut self, failure: Failure) {
        debug!("uncaught exception {}", failure);
        let failure = failure.into_uncaught();
        let Some(current) = self.current else {
            let outside = self
                .tree
                .push_detached(self.tree.root(), OUTSIDE_SUITE_TITLE);
            self.fail(outside, failure);
            return;
        };
        let runnable = self.tree.runnable(current);
        if runnable.state() == RunState::Failed || self.tree.is_pending(current) {
            return;
        }
        // The runnable already completed; a pass is overwritten.
        self.fail(current, failure);
    }

    fn drain_uncaught(&mut self) {
        while let Ok(failure) = self.uncaught_rx.try_recv() {
            self.handle_uncaught(failure);
        }
    }

    fn check_globals(&mut self, id: RunnableId) {
        let allowed = self.tree.runnable(id).allowed_globals().to_vec();
        if let Some(leak) = self.leaks.check(&self.globals, &allowed) {
            self.fail(id, leak);
        }
    }

    fn emit_test_end(&mut self, test: RunnableId) {
        self.check_globals(test);
        self.emit(EventKind::TestEnd {
            test: self.tree.runnable_info(test),
        });
    }

    fn emit_hook_end(&mut self, hook: RunnableId) {
        self.check_globals(hook);
        self.emit(EventKind::HookEnd {
            hook: self.tree.runnable_info(hook),
        });
        if let RunnableKind::Hook { current_test, .. } = &mut self.tree.runnable_mut(hook).kind {
            *current_test = None;
        }
    }

    /// Whether the engine has started traversing
    pub fn is_started(&self) -> bool {
        self.started
    }
}
