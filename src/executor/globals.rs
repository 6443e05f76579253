//! Global bindings and leak detection
//!
//! Bodies run against a shared [`GlobalScope`]. After every test and hook the
//! engine compares the scope with its allow-list and fails the runnable for
//! every name that appeared without being allowed.

use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::models::Failure;

/// Platform bindings that are always allowed
pub const PLATFORM_GLOBALS: &[&str] = &[
    "setTimeout",
    "clearTimeout",
    "setInterval",
    "clearInterval",
    "XMLHttpRequest",
    "Date",
    "setImmediate",
    "clearImmediate",
];

/// Names with this prefix belong to the engine's own surfaces
pub const RESERVED_PREFIX: &str = "suite-engine-";

/// Named ambient bindings visible to every body
#[derive(Clone, Debug, Default)]
pub struct GlobalScope {
    names: Arc<Mutex<Vec<String>>>,
}

impl GlobalScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope pre-populated with bindings that exist before the run
    pub fn with_bindings<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scope = Self::new();
        for name in names {
            scope.define(name);
        }
        scope
    }

    /// Create a binding; defining an existing name is a no-op
    pub fn define(&self, name: impl Into<String>) {
        let name = name.into();
        let mut names = self.lock();
        if !names.contains(&name) {
            names.push(name);
        }
    }

    pub fn remove(&self, name: &str) -> bool {
        let mut names = self.lock();
        let before = names.len();
        names.retain(|n| n != name);
        names.len() != before
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().iter().any(|n| n == name)
    }

    /// Current bindings in creation order
    pub fn names(&self) -> Vec<String> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.names.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Whether `name` is matched by an allow-list entry.
///
/// An entry containing `*` matches every name starting with the text before it.
pub fn matches_allowed(entry: &str, name: &str) -> bool {
    match entry.split_once('*') {
        Some((prefix, _)) => name.starts_with(prefix),
        None => entry == name,
    }
}

/// Names that are engine noise rather than leaks
fn is_noise(name: &str) -> bool {
    name.starts_with(|c: char| c.is_ascii_digit()) || name.starts_with(RESERVED_PREFIX)
}

/// Tracks the allow-list and the last observed scope size
#[derive(Clone, Debug)]
pub struct LeakDetector {
    allowed: Vec<String>,
    last_len: Option<usize>,
    enabled: bool,
}

impl LeakDetector {
    /// Allow-list seeded from the scope at construction, platform names, and
    /// environment-specific extras
    pub fn new(scope: &GlobalScope, extras: &[String]) -> Self {
        let mut allowed = scope.names();
        allowed.extend(PLATFORM_GLOBALS.iter().map(|s| s.to_string()));
        allowed.extend(extras.iter().cloned());
        Self {
            allowed,
            last_len: None,
            enabled: false,
        }
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Append names to the allow-list; with no names this is a query
    pub fn allow<I, S>(&mut self, names: I) -> &[String]
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed.extend(names.into_iter().map(Into::into));
        &self.allowed
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    /// Compare the scope against the allow-list.
    ///
    /// Skipped when the scope size has not changed since the last check. New
    /// names are added to the allow-list so each leak is reported once.
    pub fn check(&mut self, scope: &GlobalScope, runnable_allowed: &[String]) -> Option<Failure> {
        if !self.enabled {
            return None;
        }
        let names = scope.names();
        if self.last_len == Some(names.len()) {
            return None;
        }
        self.last_len = Some(names.len());

        let leaks: Vec<String> = names
            .into_iter()
            .filter(|name| !is_noise(name))
            .filter(|name| {
                !self
                    .allowed
                    .iter()
                    .chain(runnable_allowed)
                    .any(|entry| matches_allowed(entry, name))
            })
            .collect();
        if leaks.is_empty() {
            return None;
        }

        debug!("global leaks: {:?}", leaks);
        self.allowed.extend(leaks.iter().cloned());
        Some(Failure::GlobalLeak { names: leaks })
    }
}
