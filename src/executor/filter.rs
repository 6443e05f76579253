//! Test selection filters
//!
//! Pattern, exclusion-list and shard filters decide which tests of a tree run
//! and how many tests a run expects.

use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

use super::EngineError;
use crate::models::{RunnableId, SuiteId, SuiteTree};

/// Selection state of a run
#[derive(Clone, Debug, Default)]
pub struct Filter {
    pattern: Option<Regex>,
    exclude_pattern: Option<Regex>,
    exclude_titles: HashSet<String>,
    invert: bool,
    shard: Option<u32>,
}

fn compile(pattern: &str) -> Result<Regex, EngineError> {
    Regex::new(pattern).map_err(|source| EngineError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from textual patterns
    pub fn from_patterns(
        pattern: Option<&str>,
        exclude_pattern: Option<&str>,
        invert: bool,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            pattern: pattern.map(compile).transpose()?,
            exclude_pattern: exclude_pattern.map(compile).transpose()?,
            invert,
            ..Self::default()
        })
    }

    pub fn pattern(mut self, pattern: Regex) -> Self {
        debug!("grep {}", pattern);
        self.pattern = Some(pattern);
        self
    }

    pub fn exclude_pattern(mut self, pattern: Regex) -> Self {
        self.exclude_pattern = Some(pattern);
        self
    }

    pub fn invert(mut self, invert: bool) -> Self {
        self.invert = invert;
        self
    }

    /// Full titles that never run, e.g. tests completed by an earlier run
    pub fn exclude_titles<I, S>(mut self, titles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclude_titles.extend(titles.into_iter().map(Into::into));
        self
    }

    pub fn shard(mut self, shard: Option<u32>) -> Self {
        if let Some(shard) = shard {
            debug!("shard {}", shard);
        }
        self.shard = shard;
        self
    }

    /// Whether a pattern filter is active
    pub fn has_pattern(&self) -> bool {
        self.pattern.is_some() || self.exclude_pattern.is_some()
    }

    pub fn shard_id(&self) -> Option<u32> {
        self.shard
    }

    /// Match a full title against the pattern filters and the exclusion list
    pub fn matches_title(&self, full_title: &str) -> bool {
        let mut matched = self
            .pattern
            .as_ref()
            .map_or(true, |re| re.is_match(full_title));
        if let Some(exclude) = &self.exclude_pattern {
            matched = matched && !exclude.is_match(full_title);
        }
        if self.invert {
            matched = !matched;
        }
        matched && !self.exclude_titles.contains(full_title)
    }

    /// Whether a test is selected to run
    pub fn selects(&self, tree: &SuiteTree, test: RunnableId) -> bool {
        if let Some(shard) = self.shard {
            if tree.runnable(test).shard() != Some(shard) {
                return false;
            }
        }
        self.matches_title(&tree.full_title(test))
    }

    /// Number of selected tests under `suite`
    pub fn total(&self, tree: &SuiteTree, suite: SuiteId, include_pending: bool) -> usize {
        let mut total = 0;
        tree.each_test(suite, |test| {
            if self.selects(tree, test) && (include_pending || !tree.is_pending(test)) {
                total += 1;
            }
        });
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Body, TestDef};

    fn tree() -> SuiteTree {
        let mut tree = SuiteTree::new("");
        let root = tree.root();
        let api = tree.add_suite(root, "api");
        let db = tree.add_suite(root, "db");
        tree.add_test(api, TestDef::new("get users", Body::sync(|_| Ok(()))).shard(1));
        tree.add_test(api, TestDef::new("post users", Body::sync(|_| Ok(()))).shard(2));
        tree.add_test(db, TestDef::new("migrate", Body::sync(|_| Ok(()))).shard(1));
        tree.add_test(db, TestDef::todo("rollback").shard(2));
        tree
    }

    #[test]
    fn test_no_filter_selects_everything() {
        let tree = tree();
        let filter = Filter::new();
        assert_eq!(filter.total(&tree, tree.root(), true), 4);
        assert_eq!(filter.total(&tree, tree.root(), false), 3);
    }

    #[test]
    fn test_pattern_and_invert() {
        let tree = tree();
        let filter = Filter::from_patterns(Some("users"), None, false).unwrap();
        assert_eq!(filter.total(&tree, tree.root(), true), 2);

        let filter = Filter::from_patterns(Some("users"), None, true).unwrap();
        assert_eq!(filter.total(&tree, tree.root(), true), 2);
        assert!(filter.matches_title("db migrate"));
    }

    #[test]
    fn test_exclude_pattern() {
        let filter = Filter::from_patterns(Some("^api"), Some("post"), false).unwrap();
        assert!(filter.matches_title("api get users"));
        assert!(!filter.matches_title("api post users"));
    }

    #[test]
    fn test_exclude_titles_win_over_invert() {
        let filter = Filter::from_patterns(Some("migrate"), None, true)
            .unwrap()
            .exclude_titles(["api get users"]);
        assert!(!filter.matches_title("api get users"));
        assert!(filter.matches_title("api post users"));
    }

    #[test]
    fn test_shard_filter() {
        let tree = tree();
        let filter = Filter::new().shard(Some(1));
        assert_eq!(filter.total(&tree, tree.root(), true), 2);
        let filter = Filter::new().shard(Some(2));
        assert_eq!(filter.total(&tree, tree.root(), false), 1);
    }

    #[test]
    fn test_invalid_pattern() {
        let err = Filter::from_patterns(Some("(unclosed"), None, false).unwrap_err();
        assert!(matches!(err, EngineError::InvalidPattern { .. }));
    }
}
