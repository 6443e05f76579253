//! Configuration module
//!
//! Handles loading and managing run configuration.

pub mod env;
pub mod file;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::executor::{EngineError, EngineOptions, Filter};

/// Run configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Only run tests whose full title matches
    pub pattern: Option<String>,

    /// Never run tests whose full title matches
    pub exclude_pattern: Option<String>,

    /// Invert the pattern match
    pub invert: bool,

    /// Full titles to skip, e.g. tests an earlier run already completed
    pub exclude_titles: Vec<String>,

    /// Only run tests assigned to this shard
    pub shard: Option<u32>,

    pub bail: bool,

    /// Wait for an explicit start signal
    pub delay: bool,

    pub check_leaks: bool,

    /// Extra allowed globals, `*` suffix allowed
    pub allowed_globals: Vec<String>,

    /// Environment-specific allowed globals
    pub extra_globals: Vec<String>,

    pub forbid_only: bool,

    pub forbid_pending: bool,

    pub async_only: bool,

    /// Default timeout in milliseconds, 0 disables it
    pub timeout_ms: Option<u64>,

    /// Default retries
    pub retries: Option<u32>,

    /// Reporter name (console, json, json-stream, xunit, silent)
    pub reporter: String,

    /// Report file for file-capable reporters
    pub output: Option<String>,

    pub color: bool,

    pub log_level: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            pattern: None,
            exclude_pattern: None,
            invert: false,
            exclude_titles: Vec::new(),
            shard: None,
            bail: false,
            delay: false,
            check_leaks: false,
            allowed_globals: Vec::new(),
            extra_globals: Vec::new(),
            forbid_only: false,
            forbid_pending: false,
            async_only: false,
            timeout_ms: None,
            retries: None,
            reporter: "console".to_string(),
            output: None,
            color: true,
            log_level: "warn".to_string(),
        }
    }
}

impl RunConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).context("Failed to read config file")?;

        let config: Self = if file::is_yaml_file(path.as_ref()) {
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?
        } else {
            serde_json::from_str(&content).context("Failed to parse JSON config")?
        };

        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = if file::is_yaml_file(path.as_ref()) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Engine switches carried by this configuration
    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            bail: self.bail,
            delay: self.delay,
            check_leaks: self.check_leaks,
            allowed_globals: self.allowed_globals.clone(),
            extra_globals: self.extra_globals.clone(),
            forbid_only: self.forbid_only,
            forbid_pending: self.forbid_pending,
            async_only: self.async_only,
        }
    }

    /// Test selection carried by this configuration
    pub fn filter(&self) -> Result<Filter, EngineError> {
        Ok(Filter::from_patterns(
            self.pattern.as_deref(),
            self.exclude_pattern.as_deref(),
            self.invert,
        )?
        .exclude_titles(self.exclude_titles.iter().cloned())
        .shard(self.shard))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(&mut self, other: RunConfig) {
        let defaults = RunConfig::default();

        if other.pattern.is_some() {
            self.pattern = other.pattern;
        }
        if other.exclude_pattern.is_some() {
            self.exclude_pattern = other.exclude_pattern;
        }
        if other.shard.is_some() {
            self.shard = other.shard;
        }
        if other.timeout_ms.is_some() {
            self.timeout_ms = other.timeout_ms;
        }
        if other.retries.is_some() {
            self.retries = other.retries;
        }
        if other.output.is_some() {
            self.output = other.output;
        }
        if other.reporter != defaults.reporter {
            self.reporter = other.reporter;
        }
        if other.log_level != defaults.log_level {
            self.log_level = other.log_level;
        }
        if !other.color {
            self.color = false;
        }

        self.invert |= other.invert;
        self.bail |= other.bail;
        self.delay |= other.delay;
        self.check_leaks |= other.check_leaks;
        self.forbid_only |= other.forbid_only;
        self.forbid_pending |= other.forbid_pending;
        self.async_only |= other.async_only;

        extend_unique(&mut self.exclude_titles, other.exclude_titles);
        extend_unique(&mut self.allowed_globals, other.allowed_globals);
        extend_unique(&mut self.extra_globals, other.extra_globals);
    }
}

fn extend_unique(target: &mut Vec<String>, items: Vec<String>) {
    for item in items {
        if !target.contains(&item) {
            target.push(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = RunConfig::default();
        assert_eq!(config.reporter, "console");
        assert!(config.timeout().is_none());
        assert!(!config.engine_options().bail);
    }

    #[test]
    fn test_save_load_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("run.json");

        let config = RunConfig {
            pattern: Some("cache".to_string()),
            shard: Some(2),
            timeout_ms: Some(0),
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = RunConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.timeout(), Some(Duration::ZERO));
    }

    #[test]
    fn test_filter_from_config() {
        let config = RunConfig {
            pattern: Some("(unclosed".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            config.filter(),
            Err(EngineError::InvalidPattern { .. })
        ));

        let config = RunConfig {
            pattern: Some("^cache".to_string()),
            shard: Some(1),
            ..Default::default()
        };
        let filter = config.filter().unwrap();
        assert!(filter.has_pattern());
        assert_eq!(filter.shard_id(), Some(1));
        assert!(filter.matches_title("cache hit"));
        assert!(!filter.matches_title("store cache"));
    }

    #[test]
    fn test_merge() {
        let mut base = RunConfig {
            pattern: Some("a".to_string()),
            allowed_globals: vec!["x".to_string()],
            ..Default::default()
        };
        base.merge(RunConfig {
            bail: true,
            reporter: "json".to_string(),
            allowed_globals: vec!["x".to_string(), "y*".to_string()],
            ..Default::default()
        });

        assert_eq!(base.pattern.as_deref(), Some("a"));
        assert!(base.bail);
        assert_eq!(base.reporter, "json");
        assert_eq!(base.allowed_globals, vec!["x", "y*"]);
    }
}
