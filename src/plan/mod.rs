//! Plan documents
//!
//! A plan describes a suite tree in YAML or JSON. Test and hook bodies are
//! scripts of [`Step`]s, which lets the binary and the tests build trees
//! without writing code.

mod step;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub use step::{script, Step, Style};

use crate::models::{HookDef, HookPhase, SuiteId, SuiteTree, TestDef};

/// Errors raised while loading or validating a plan
#[derive(Error, Debug)]
pub enum PlanError {
    #[error("failed to read plan {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML plan: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid JSON plan: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{location}: {message}")]
    Invalid { location: String, message: String },
}

/// A hook declaration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HookPlan {
    pub phase: HookPhase,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub style: Style,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub globals: Vec<String>,
}

/// A test declaration; a test without steps is pending
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TestPlan {
    pub title: String,
    #[serde(default)]
    pub steps: Option<Vec<Step>>,
    #[serde(default)]
    pub style: Style,
    #[serde(default)]
    pub only: bool,
    #[serde(default)]
    pub pending: bool,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub shard: Option<u32>,
    #[serde(default)]
    pub globals: Vec<String>,
}

/// A suite declaration; nested suites inherit timeout, retries and bail
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SuitePlan {
    pub title: String,
    pub bail: Option<bool>,
    pub pending: bool,
    pub only: bool,
    pub timeout_ms: Option<u64>,
    pub retries: Option<u32>,
    pub hooks: Vec<HookPlan>,
    pub tests: Vec<TestPlan>,
    pub suites: Vec<SuitePlan>,
}

/// A whole plan: the root suite
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Plan {
    pub root: SuitePlan,
}

impl Plan {
    /// Load from a file; `.json` is parsed as JSON, anything else as YAML
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PlanError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| PlanError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let plan = if path.extension().map(|e| e == "json").unwrap_or(false) {
            Self::from_json(&content)?
        } else {
            Self::from_yaml(&content)?
        };
        debug!("Loaded plan {} with {} tests", path.display(), plan.test_count());
        Ok(plan)
    }

    pub fn from_yaml(content: &str) -> Result<Self, PlanError> {
        let plan: Self = serde_yaml::from_str(content)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn from_json(content: &str) -> Result<Self, PlanError> {
        let plan: Self = serde_json::from_str(content)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn test_count(&self) -> usize {
        fn count(suite: &SuitePlan) -> usize {
            suite.tests.len() + suite.suites.iter().map(count).sum::<usize>()
        }
        count(&self.root)
    }

    /// Reject scripts that cannot behave as written
    pub fn validate(&self) -> Result<(), PlanError> {
        let mut stack = vec![(self.root.title.clone(), &self.root)];
        while let Some((location, suite)) = stack.pop() {
            for hook in &suite.hooks {
                let location = format!("{} {}", location, hook.phase).trim().to_string();
                check_style(&location, &hook.steps, hook.style)?;
            }
            for test in &suite.tests {
                let location = format!("{} {}", location, test.title).trim().to_string();
                let steps = test.steps.as_deref().unwrap_or_default();
                check_style(&location, steps, test.style)?;
                if steps.iter().any(|s| matches!(s, Step::FailTest { .. })) {
                    return Err(PlanError::Invalid {
                        location,
                        message: "fail-test is only valid inside hooks".to_string(),
                    });
                }
            }
            for child in &suite.suites {
                let child_location = format!("{} {}", location, child.title).trim().to_string();
                stack.push((child_location, child));
            }
        }
        Ok(())
    }

    /// Build the suite tree this plan describes
    pub fn build(&self) -> SuiteTree {
        self.build_with_defaults(None, None)
    }

    /// Build with run-wide defaults applied to the root before anything inherits from it.
    /// Values declared in the plan still win.
    pub fn build_with_defaults(&self, timeout: Option<Duration>, retries: Option<u32>) -> SuiteTree {
        let mut tree = SuiteTree::new(self.root.title.as_str());
        let root = tree.root();
        if let Some(timeout) = timeout {
            tree.set_timeout(root, timeout);
        }
        if let Some(retries) = retries {
            tree.set_retries(root, retries);
        }
        configure(&mut tree, root, &self.root);
        tree
    }
}

fn check_style(location: &str, steps: &[Step], style: Style) -> Result<(), PlanError> {
    if style == Style::Sync && steps.iter().any(|s| matches!(s, Step::NeverDone)) {
        return Err(PlanError::Invalid {
            location: location.to_string(),
            message: "never-done needs the future or callback style".to_string(),
        });
    }
    Ok(())
}

fn configure(tree: &mut SuiteTree, suite: SuiteId, plan: &SuitePlan) {
    if let Some(bail) = plan.bail {
        tree.set_bail(suite, bail);
    }
    if let Some(ms) = plan.timeout_ms {
        tree.set_timeout(suite, Duration::from_millis(ms));
    }
    if let Some(retries) = plan.retries {
        tree.set_retries(suite, retries);
    }
    if plan.pending {
        tree.set_pending(suite);
    }

    for hook in &plan.hooks {
        let mut def = HookDef::new(hook.phase, script(hook.steps.clone(), hook.style));
        if let Some(name) = &hook.name {
            def = def.named(name.as_str());
        }
        if let Some(ms) = hook.timeout_ms {
            def = def.timeout(Duration::from_millis(ms));
        }
        for name in &hook.globals {
            def = def.allow_global(name.as_str());
        }
        tree.add_hook(suite, def);
    }

    for test in &plan.tests {
        let mut def = match &test.steps {
            Some(steps) => TestDef::new(test.title.as_str(), script(steps.clone(), test.style)),
            None => TestDef::todo(test.title.as_str()),
        };
        if test.pending {
            def = def.pending();
        }
        if let Some(retries) = test.retries {
            def = def.retries(retries);
        }
        if let Some(ms) = test.timeout_ms {
            def = def.timeout(Duration::from_millis(ms));
        }
        if let Some(shard) = test.shard {
            def = def.shard(shard);
        }
        for name in &test.globals {
            def = def.allow_global(name.as_str());
        }
        let id = tree.add_test(suite, def);
        if test.only {
            tree.mark_only_test(id);
        }
    }

    for child in &plan.suites {
        let id = tree.add_suite(suite, child.title.as_str());
        configure(tree, id, child);
        if child.only {
            tree.mark_only_suite(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Engine, EngineOptions};
    use crate::models::EventLog;
    use std::io::Write;

    const PLAN: &str = r#"
title: ""
suites:
  - title: storage
    timeout_ms: 500
    hooks:
      - phase: beforeEach
        name: open
        steps: [{ do: pass }]
    tests:
      - title: writes
        steps: [{ do: pass }]
      - title: reads
        style: future
        steps:
          - { do: sleep, ms: 1 }
          - { do: fail, message: "short read" }
      - title: compacts
    suites:
      - title: flaky
        retries: 2
        tests:
          - title: eventually
            steps: [{ do: fail-until, attempt: 1 }]
"#;

    #[test]
    fn test_build_tree() {
        let plan = Plan::from_yaml(PLAN).unwrap();
        assert_eq!(plan.test_count(), 4);

        let tree = plan.build();
        assert_eq!(tree.total(tree.root()), 4);
        let storage = tree.suite(tree.root()).suites()[0];
        assert_eq!(tree.suite(storage).timeout(), Duration::from_millis(500));
        let flaky = tree.suite(storage).suites()[0];
        assert_eq!(tree.suite(flaky).timeout(), Duration::from_millis(500));
        assert_eq!(tree.suite(flaky).retries(), 2);

        let hook = tree.suite(storage).hooks(HookPhase::BeforeEach)[0];
        assert_eq!(tree.runnable(hook).title(), "\"before each\" hook: open");
        let compacts = tree.suite(storage).tests()[2];
        assert!(tree.is_pending(compacts));
    }

    #[test]
    fn test_build_with_defaults() {
        let plan = Plan::from_yaml(PLAN).unwrap();
        let tree = plan.build_with_defaults(Some(Duration::from_millis(50)), Some(1));
        assert_eq!(tree.suite(tree.root()).timeout(), Duration::from_millis(50));
        let storage = tree.suite(tree.root()).suites()[0];
        assert_eq!(tree.suite(storage).timeout(), Duration::from_millis(500));
        assert_eq!(tree.suite(storage).retries(), 1);
        let flaky = tree.suite(storage).suites()[0];
        assert_eq!(tree.suite(flaky).retries(), 2);
    }

    #[tokio::test]
    async fn test_run_plan() {
        let log = EventLog::new();
        let tree = Plan::from_yaml(PLAN).unwrap().build();
        let failures = Engine::new(tree, EngineOptions::default(), log.clone())
            .run()
            .await
            .unwrap();
        assert_eq!(failures, 1);

        let trace = log.trace();
        assert!(trace.contains(&"pass writes".to_string()));
        assert!(trace.contains(&"fail reads".to_string()));
        assert!(trace.contains(&"pending compacts".to_string()));
        assert!(trace.contains(&"pass eventually".to_string()));
    }

    #[test]
    fn test_load_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"title": "root", "tests": [{{"title": "one", "steps": [{{"do": "pass"}}], "shard": 3}}]}}"#
        )
        .unwrap();

        let plan = Plan::load(file.path()).unwrap();
        assert_eq!(plan.root.title, "root");
        assert_eq!(plan.root.tests[0].shard, Some(3));
    }

    #[test]
    fn test_invalid_plans() {
        let never_done = r#"
tests:
  - title: hangs
    steps: [{ do: never-done }]
"#;
        assert!(matches!(
            Plan::from_yaml(never_done),
            Err(PlanError::Invalid { .. })
        ));

        let fail_test = r#"
suites:
  - title: outer
    tests:
      - title: misuse
        style: future
        steps: [{ do: fail-test, message: nope }]
"#;
        match Plan::from_yaml(fail_test) {
            Err(PlanError::Invalid { location, .. }) => assert_eq!(location, "outer misuse"),
            other => panic!("unexpected: {:?}", other),
        }

        assert!(matches!(
            Plan::from_yaml("tests: [{ title: x, colour: red }]"),
            Err(PlanError::Yaml(_))
        ));
        assert!(matches!(
            Plan::load("/nonexistent/plan.yaml"),
            Err(PlanError::Io { .. })
        ));
    }
}
