//! Suite tree models
//!
//! An arena holding every suite and runnable of a run. Suites refer to their
//! children and runnables by index; back-references are plain indices too.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::body::Body;
use super::event::{RunnableInfo, SuiteInfo};
use super::runnable::{HookDef, HookPhase, Runnable, RunnableId, RunnableKind, TestDef};

/// Default per-runnable timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Index of a suite inside its [`SuiteTree`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SuiteId(pub(crate) usize);

/// Ordered hook lists of a suite, one per phase
#[derive(Clone, Debug, Default)]
pub struct HookLists {
    before_all: Vec<RunnableId>,
    before_each: Vec<RunnableId>,
    after_all: Vec<RunnableId>,
    after_each: Vec<RunnableId>,
}

impl HookLists {
    pub fn get(&self, phase: HookPhase) -> &[RunnableId] {
        match phase {
            HookPhase::BeforeAll => &self.before_all,
            HookPhase::BeforeEach => &self.before_each,
            HookPhase::AfterAll => &self.after_all,
            HookPhase::AfterEach => &self.after_each,
        }
    }

    fn get_mut(&mut self, phase: HookPhase) -> &mut Vec<RunnableId> {
        match phase {
            HookPhase::BeforeAll => &mut self.before_all,
            HookPhase::BeforeEach => &mut self.before_each,
            HookPhase::AfterAll => &mut self.after_all,
            HookPhase::AfterEach => &mut self.after_each,
        }
    }

    fn iter(&self) -> impl Iterator<Item = RunnableId> + '_ {
        self.before_all
            .iter()
            .chain(&self.before_each)
            .chain(&self.after_all)
            .chain(&self.after_each)
            .copied()
    }
}

/// A named group of tests, hooks and child suites
#[derive(Clone, Debug)]
pub struct Suite {
    title: String,
    parent: Option<SuiteId>,
    suites: Vec<SuiteId>,
    tests: Vec<RunnableId>,
    hooks: HookLists,
    bail: Option<bool>,
    pending: bool,
    timeout: Duration,
    retries: u32,
    only_tests: Vec<RunnableId>,
    only_suites: Vec<SuiteId>,
    /// Retry attempts scheduled for this suite's tests
    attempts: Vec<RunnableId>,
}

impl Suite {
    fn new(title: String, parent: Option<SuiteId>, timeout: Duration, retries: u32) -> Self {
        Self {
            title,
            parent,
            suites: Vec::new(),
            tests: Vec::new(),
            hooks: HookLists::default(),
            bail: None,
            pending: false,
            timeout,
            retries,
            only_tests: Vec::new(),
            only_suites: Vec::new(),
            attempts: Vec::new(),
        }
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn parent(&self) -> Option<SuiteId> {
        self.parent
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn suites(&self) -> &[SuiteId] {
        &self.suites
    }

    pub fn tests(&self) -> &[RunnableId] {
        &self.tests
    }

    pub fn hooks(&self, phase: HookPhase) -> &[RunnableId] {
        self.hooks.get(phase)
    }

    /// Bail flag set on this suite itself, if any
    pub fn bail(&self) -> Option<bool> {
        self.bail
    }

    pub fn is_marked_pending(&self) -> bool {
        self.pending
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn only_tests(&self) -> &[RunnableId] {
        &self.only_tests
    }

    pub fn only_suites(&self) -> &[SuiteId] {
        &self.only_suites
    }
}

/// Hierarchical container of suites, tests and hooks with exactly one root
#[derive(Clone, Debug)]
pub struct SuiteTree {
    suites: Vec<Suite>,
    runnables: Vec<Runnable>,
}

impl SuiteTree {
    /// Create a tree with an (often empty) root title
    pub fn new(root_title: impl Into<String>) -> Self {
        Self {
            suites: vec![Suite::new(root_title.into(), None, DEFAULT_TIMEOUT, 0)],
            runnables: Vec::new(),
        }
    }

    pub fn root(&self) -> SuiteId {
        SuiteId(0)
    }

    pub fn suite(&self, id: SuiteId) -> &Suite {
        &self.suites[id.0]
    }

    pub fn runnable(&self, id: RunnableId) -> &Runnable {
        &self.runnables[id.0]
    }

    pub(crate) fn runnable_mut(&mut self, id: RunnableId) -> &mut Runnable {
        &mut self.runnables[id.0]
    }

    /// Add a child suite; it inherits timeout and retries from its parent
    pub fn add_suite(&mut self, parent: SuiteId, title: impl Into<String>) -> SuiteId {
        let id = SuiteId(self.suites.len());
        let (timeout, retries) = {
            let parent = self.suite(parent);
            (parent.timeout, parent.retries)
        };
        self.suites
            .push(Suite::new(title.into(), Some(parent), timeout, retries));
        self.suites[parent.0].suites.push(id);
        id
    }

    pub fn add_test(&mut self, suite: SuiteId, def: TestDef) -> RunnableId {
        let (timeout, retries) = {
            let suite = self.suite(suite);
            (suite.timeout, suite.retries)
        };
        let id = self.push(Runnable::test(def, suite, timeout, retries));
        self.suites[suite.0].tests.push(id);
        id
    }

    pub fn add_hook(&mut self, suite: SuiteId, def: HookDef) -> RunnableId {
        let timeout = self.suite(suite).timeout;
        let phase = def.phase();
        let id = self.push(Runnable::hook(def, suite, timeout));
        self.suites[suite.0].hooks.get_mut(phase).push(id);
        id
    }

    /// Shorthand for an unnamed hook
    pub fn hook(&mut self, suite: SuiteId, phase: HookPhase, body: Body) -> RunnableId {
        self.add_hook(suite, HookDef::new(phase, body))
    }

    /// Shorthand for a test with default settings
    pub fn it(&mut self, suite: SuiteId, title: impl Into<String>, body: Body) -> RunnableId {
        self.add_test(suite, TestDef::new(title, body))
    }

    pub fn set_bail(&mut self, suite: SuiteId, bail: bool) {
        self.suites[suite.0].bail = Some(bail);
    }

    /// Declare a whole suite skipped
    pub fn set_pending(&mut self, suite: SuiteId) {
        self.suites[suite.0].pending = true;
    }

    /// Timeout for runnables declared afterwards in this suite and new children
    pub fn set_timeout(&mut self, suite: SuiteId, timeout: Duration) {
        self.suites[suite.0].timeout = timeout;
    }

    pub fn set_retries(&mut self, suite: SuiteId, retries: u32) {
        self.suites[suite.0].retries = retries;
    }

    /// Mark a test exclusive within its suite
    pub fn mark_only_test(&mut self, test: RunnableId) {
        let parent = self.runnable(test).parent;
        let only = &mut self.suites[parent.0].only_tests;
        if !only.contains(&test) {
            only.push(test);
        }
    }

    /// Mark a suite exclusive within its parent
    pub fn mark_only_suite(&mut self, suite: SuiteId) {
        let Some(parent) = self.suite(suite).parent else {
            return;
        };
        let only = &mut self.suites[parent.0].only_suites;
        if !only.contains(&suite) {
            only.push(suite);
        }
    }

    fn push(&mut self, runnable: Runnable) -> RunnableId {
        let id = RunnableId(self.runnables.len());
        self.runnables.push(runnable);
        id
    }

    /// Ancestors of a suite, closest first
    pub fn parents(&self, suite: SuiteId) -> Vec<SuiteId> {
        let mut parents = Vec::new();
        let mut cursor = self.suite(suite).parent;
        while let Some(id) = cursor {
            parents.push(id);
            cursor = self.suite(id).parent;
        }
        parents
    }

    /// Titles from the root down to the suite, empty titles skipped
    pub fn suite_title_path(&self, suite: SuiteId) -> Vec<&str> {
        let mut path: Vec<&str> = std::iter::once(suite)
            .chain(self.parents(suite))
            .map(|id| self.suite(id).title.as_str())
            .filter(|title| !title.is_empty())
            .collect();
        path.reverse();
        path
    }

    pub fn suite_full_title(&self, suite: SuiteId) -> String {
        self.suite_title_path(suite).join(" ")
    }

    /// Full title of a runnable: ancestor titles and its own, space joined
    pub fn full_title(&self, id: RunnableId) -> String {
        let runnable = self.runnable(id);
        let mut path = self.suite_title_path(runnable.parent);
        path.push(&runnable.title);
        path.join(" ")
    }

    /// Visit every test under `suite` depth-first in declaration order
    pub fn each_test(&self, suite: SuiteId, mut visit: impl FnMut(RunnableId)) {
        let mut stack = vec![suite];
        while let Some(id) = stack.pop() {
            let suite = self.suite(id);
            suite.tests.iter().copied().for_each(&mut visit);
            stack.extend(suite.suites.iter().rev().copied());
        }
    }

    /// Number of tests under `suite`, ignoring any filter
    pub fn total(&self, suite: SuiteId) -> usize {
        let mut total = 0;
        self.each_test(suite, |_| total += 1);
        total
    }

    /// Whether the runnable or any enclosing suite is skipped
    pub fn is_pending(&self, id: RunnableId) -> bool {
        let runnable = self.runnable(id);
        runnable.is_marked_pending() || self.suite_is_pending(runnable.parent)
    }

    pub fn suite_is_pending(&self, suite: SuiteId) -> bool {
        std::iter::once(suite)
            .chain(self.parents(suite))
            .any(|id| self.suite(id).pending)
    }

    /// Bail setting in effect for a suite: its own, else the nearest ancestor's
    pub fn bail_active(&self, suite: SuiteId) -> bool {
        std::iter::once(suite)
            .chain(self.parents(suite))
            .find_map(|id| self.suite(id).bail)
            .unwrap_or(false)
    }

    /// Whether any exclusivity marker exists in or below `suite`
    pub fn has_only(&self, suite: SuiteId) -> bool {
        let mut stack = vec![suite];
        while let Some(id) = stack.pop() {
            let suite = self.suite(id);
            if !suite.only_tests.is_empty() || !suite.only_suites.is_empty() {
                return true;
            }
            stack.extend(suite.suites.iter().copied());
        }
        false
    }

    /// Prune the tree down to exclusive suites and tests.
    ///
    /// Returns whether the suite still has anything to run. The caller keeps
    /// the root regardless.
    pub fn filter_only(&mut self, suite: SuiteId) -> bool {
        let only_tests = self.suite(suite).only_tests.clone();
        if !only_tests.is_empty() {
            let node = &mut self.suites[suite.0];
            node.tests = only_tests;
            node.suites.clear();
        } else {
            self.suites[suite.0].tests.clear();
            let only_suites = self.suite(suite).only_suites.clone();
            for only in &only_suites {
                if self.has_only(*only) {
                    self.filter_only(*only);
                }
            }
            let children = self.suite(suite).suites.clone();
            let kept: Vec<SuiteId> = children
                .into_iter()
                .filter(|child| only_suites.contains(child) || self.filter_only(*child))
                .collect();
            self.suites[suite.0].suites = kept;
        }
        let node = self.suite(suite);
        !node.tests.is_empty() || !node.suites.is_empty()
    }

    /// Schedule another attempt of a failed test
    pub(crate) fn push_retry(&mut self, test: RunnableId) -> Option<RunnableId> {
        let attempt = self.runnable(test).clone_for_retry(test)?;
        let parent = attempt.parent;
        let id = self.push(attempt);
        self.suites[parent.0].attempts.push(id);
        Some(id)
    }

    /// Runnable that is not listed in any suite, e.g. for stray errors
    pub(crate) fn push_detached(&mut self, parent: SuiteId, title: &str) -> RunnableId {
        self.push(Runnable::detached(title, parent))
    }

    /// Drop the bodies of a suite's hooks, tests and attempts, keeping titles
    pub fn release_bodies(&mut self, suite: SuiteId) {
        let node = &self.suites[suite.0];
        let ids: Vec<RunnableId> = node
            .hooks
            .iter()
            .chain(node.tests.iter().copied())
            .chain(node.attempts.iter().copied())
            .collect();
        for id in ids {
            self.runnables[id.0].release_body();
        }
    }

    pub fn release_bodies_recursive(&mut self, suite: SuiteId) {
        let mut stack = vec![suite];
        while let Some(id) = stack.pop() {
            self.release_bodies(id);
            stack.extend(self.suite(id).suites.iter().copied());
        }
    }

    /// Event payload describing a runnable as it is now
    pub fn runnable_info(&self, id: RunnableId) -> RunnableInfo {
        let runnable = self.runnable(id);
        let (phase, original_title) = match &runnable.kind {
            RunnableKind::Hook {
                phase,
                original_title,
                ..
            } => (Some(*phase), original_title.clone()),
            RunnableKind::Test { .. } => (None, None),
        };
        RunnableInfo {
            id,
            suite: runnable.parent,
            phase,
            title: runnable.title.clone(),
            original_title,
            full_title: self.full_title(id),
            state: runnable.state,
            duration_ms: runnable.duration.map(|d| d.as_millis() as u64),
            current_retry: runnable.current_retry,
            retries: runnable.retries,
            error: runnable.error.clone(),
        }
    }

    /// Event payload describing a suite
    pub fn suite_info(&self, id: SuiteId) -> SuiteInfo {
        let suite = self.suite(id);
        SuiteInfo {
            id,
            title: suite.title.clone(),
            full_title: self.suite_full_title(id),
            root: suite.is_root(),
            depth: self.parents(id).len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> Body {
        Body::sync(|_| Ok(()))
    }

    fn sample_tree() -> (SuiteTree, SuiteId, SuiteId) {
        let mut tree = SuiteTree::new("");
        let root = tree.root();
        let math = tree.add_suite(root, "math");
        let nested = tree.add_suite(math, "nested");
        tree.it(root, "top", noop());
        tree.it(math, "adds", noop());
        tree.it(nested, "deep", noop());
        (tree, math, nested)
    }

    #[test]
    fn test_full_titles_skip_empty_root() {
        let (tree, math, nested) = sample_tree();
        assert_eq!(tree.suite_full_title(nested), "math nested");
        let deep = tree.suite(nested).tests()[0];
        assert_eq!(tree.full_title(deep), "math nested deep");
        assert_eq!(tree.parents(nested), vec![math, tree.root()]);
    }

    #[test]
    fn test_each_test_is_depth_first() {
        let (tree, _, _) = sample_tree();
        let mut titles = Vec::new();
        tree.each_test(tree.root(), |id| titles.push(tree.runnable(id).title().to_string()));
        assert_eq!(titles, vec!["top", "adds", "deep"]);
        assert_eq!(tree.total(tree.root()), 3);
    }

    #[test]
    fn test_children_inherit_timeout_and_retries() {
        let mut tree = SuiteTree::new("");
        let root = tree.root();
        tree.set_timeout(root, Duration::from_millis(50));
        tree.set_retries(root, 3);
        let child = tree.add_suite(root, "child");
        let test = tree.it(child, "t", noop());
        assert_eq!(tree.runnable(test).timeout(), Duration::from_millis(50));
        assert_eq!(tree.runnable(test).retries(), 3);
    }

    #[test]
    fn test_bail_uses_nearest_setting() {
        let (mut tree, math, nested) = sample_tree();
        assert!(!tree.bail_active(nested));
        tree.set_bail(tree.root(), true);
        assert!(tree.bail_active(nested));
        tree.set_bail(math, false);
        assert!(!tree.bail_active(nested));
    }

    #[test]
    fn test_pending_suite_marks_descendants() {
        let (mut tree, math, nested) = sample_tree();
        tree.set_pending(math);
        let deep = tree.suite(nested).tests()[0];
        assert!(tree.is_pending(deep));
        let top = tree.suite(tree.root()).tests()[0];
        assert!(!tree.is_pending(top));
    }

    #[test]
    fn test_filter_only_keeps_exclusive_tests() {
        let mut tree = SuiteTree::new("");
        let root = tree.root();
        let a = tree.add_suite(root, "a");
        let b = tree.add_suite(root, "b");
        tree.add_suite(a, "a-child");
        let keep = tree.it(a, "keep", noop());
        tree.it(a, "drop", noop());
        tree.it(b, "other", noop());
        tree.it(root, "root test", noop());
        tree.mark_only_test(keep);

        assert!(tree.has_only(root));
        tree.filter_only(root);

        assert_eq!(tree.suite(root).suites(), &[a]);
        assert!(tree.suite(root).tests().is_empty());
        assert_eq!(tree.suite(a).tests(), &[keep]);
        assert!(tree.suite(a).suites().is_empty());
    }

    #[test]
    fn test_filter_only_keeps_whole_exclusive_suite() {
        let mut tree = SuiteTree::new("");
        let root = tree.root();
        let a = tree.add_suite(root, "a");
        let inner = tree.add_suite(a, "inner");
        let b = tree.add_suite(root, "b");
        tree.it(a, "one", noop());
        tree.it(inner, "two", noop());
        tree.it(b, "three", noop());
        tree.mark_only_suite(a);

        tree.filter_only(root);
        assert_eq!(tree.suite(root).suites(), &[a]);
        assert_eq!(tree.suite(a).tests().len(), 1);
        assert_eq!(tree.suite(a).suites(), &[inner]);
        assert_eq!(tree.total(root), 2);
    }

    #[test]
    fn test_filter_only_nested_exclusive_inside_exclusive() {
        let mut tree = SuiteTree::new("");
        let root = tree.root();
        let a = tree.add_suite(root, "a");
        let inner = tree.add_suite(a, "inner");
        tree.it(a, "skipped", noop());
        let only = tree.it(inner, "only", noop());
        tree.it(inner, "not", noop());
        tree.mark_only_suite(a);
        tree.mark_only_test(only);

        tree.filter_only(root);
        assert!(tree.suite(a).tests().is_empty());
        assert_eq!(tree.suite(inner).tests(), &[only]);
        assert_eq!(tree.total(root), 1);
    }

    #[test]
    fn test_release_bodies_keeps_titles() {
        let (mut tree, math, _) = sample_tree();
        let hook = tree.hook(math, HookPhase::BeforeAll, noop());
        tree.release_bodies_recursive(math);
        assert!(!tree.runnable(hook).has_body());
        let adds = tree.suite(math).tests()[0];
        assert!(!tree.runnable(adds).has_body());
        assert_eq!(tree.runnable(adds).title(), "adds");
        let top = tree.suite(tree.root()).tests()[0];
        assert!(tree.runnable(top).has_body());
    }

    #[test]
    fn test_retry_attempts_are_not_listed_as_tests() {
        let (mut tree, math, _) = sample_tree();
        let adds = tree.suite(math).tests()[0];
        let attempt = tree.push_retry(adds).unwrap();
        assert_eq!(tree.runnable(attempt).current_retry(), 1);
        assert_eq!(tree.suite(math).tests(), &[adds]);
        tree.release_bodies(math);
        assert!(!tree.runnable(attempt).has_body());
    }
}
