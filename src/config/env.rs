//! Environment variable configuration
//!
//! Provides environment variable overrides for configuration.

use std::env;

use super::RunConfig;

/// Environment variable prefix
const ENV_PREFIX: &str = "SUITE_ENGINE";

/// Environment configuration from environment variables
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnvConfig {
    /// Pattern from SUITE_ENGINE_GREP
    pub grep: Option<String>,
    /// Invert from SUITE_ENGINE_INVERT
    pub invert: Option<bool>,
    /// Bail from SUITE_ENGINE_BAIL
    pub bail: Option<bool>,
    /// Shard from SUITE_ENGINE_SHARD
    pub shard: Option<u32>,
    /// Timeout in ms from SUITE_ENGINE_TIMEOUT
    pub timeout: Option<u64>,
    /// Retries from SUITE_ENGINE_RETRIES
    pub retries: Option<u32>,
    /// Leak check from SUITE_ENGINE_CHECK_LEAKS
    pub check_leaks: Option<bool>,
    /// Reporter from SUITE_ENGINE_REPORTER
    pub reporter: Option<String>,
    /// Config file from SUITE_ENGINE_CONFIG
    pub config_file: Option<String>,
    /// Allowed globals from SUITE_ENGINE_GLOBALS, comma separated
    pub globals: Vec<String>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            grep: get_env("GREP"),
            invert: get_env_bool("INVERT"),
            bail: get_env_bool("BAIL"),
            shard: get_env_parse("SHARD"),
            timeout: get_env_parse("TIMEOUT"),
            retries: get_env_parse("RETRIES"),
            check_leaks: get_env_bool("CHECK_LEAKS"),
            reporter: get_env("REPORTER"),
            config_file: get_env("CONFIG"),
            globals: get_env("GLOBALS")
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default(),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        self.grep.is_some()
            || self.invert.is_some()
            || self.bail.is_some()
            || self.shard.is_some()
            || self.timeout.is_some()
            || self.retries.is_some()
            || self.check_leaks.is_some()
            || self.reporter.is_some()
            || self.config_file.is_some()
            || !self.globals.is_empty()
    }

    /// Override the values that are set
    pub fn apply(&self, config: &mut RunConfig) {
        if let Some(grep) = &self.grep {
            config.pattern = Some(grep.clone());
        }
        if let Some(invert) = self.invert {
            config.invert = invert;
        }
        if let Some(bail) = self.bail {
            config.bail = bail;
        }
        if self.shard.is_some() {
            config.shard = self.shard;
        }
        if self.timeout.is_some() {
            config.timeout_ms = self.timeout;
        }
        if self.retries.is_some() {
            config.retries = self.retries;
        }
        if let Some(check_leaks) = self.check_leaks {
            config.check_leaks = check_leaks;
        }
        if let Some(reporter) = &self.reporter {
            config.reporter = reporter.clone();
        }
        for name in &self.globals {
            if !config.extra_globals.contains(name) {
                config.extra_globals.push(name.clone());
            }
        }
    }

    /// Print current environment configuration
    pub fn print_summary(&self) {
        println!("Environment Configuration:");
        println!("  {}_GREP:         {:?}", ENV_PREFIX, self.grep);
        println!("  {}_INVERT:       {:?}", ENV_PREFIX, self.invert);
        println!("  {}_BAIL:         {:?}", ENV_PREFIX, self.bail);
        println!("  {}_SHARD:        {:?}", ENV_PREFIX, self.shard);
        println!("  {}_TIMEOUT:      {:?}", ENV_PREFIX, self.timeout);
        println!("  {}_RETRIES:      {:?}", ENV_PREFIX, self.retries);
        println!("  {}_CHECK_LEAKS:  {:?}", ENV_PREFIX, self.check_leaks);
        println!("  {}_REPORTER:     {:?}", ENV_PREFIX, self.reporter);
        println!("  {}_CONFIG:       {:?}", ENV_PREFIX, self.config_file);
        println!("  {}_GLOBALS:      {:?}", ENV_PREFIX, self.globals);
    }
}

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    get_env(name).and_then(|v| v.parse().ok())
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Builder for setting environment variables (useful for testing)
pub struct EnvBuilder {
    vars: Vec<(String, String)>,
}

impl EnvBuilder {
    pub fn new() -> Self {
        Self { vars: Vec::new() }
    }

    pub fn grep(mut self, pattern: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_GREP"), pattern.into()));
        self
    }

    pub fn bail(mut self, bail: bool) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_BAIL"), bail.to_string()));
        self
    }

    pub fn shard(mut self, shard: u32) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_SHARD"), shard.to_string()));
        self
    }

    pub fn timeout(mut self, timeout_ms: u64) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_TIMEOUT"), timeout_ms.to_string()));
        self
    }

    pub fn reporter(mut self, reporter: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_REPORTER"), reporter.into()));
        self
    }

    pub fn globals(mut self, globals: impl Into<String>) -> Self {
        self.vars.push((format!("{ENV_PREFIX}_GLOBALS"), globals.into()));
        self
    }

    /// Apply environment variables
    pub fn apply(self) {
        for (key, value) in self.vars {
            env::set_var(key, value);
        }
    }

    /// Apply and return guard that restores on drop
    pub fn apply_scoped(self) -> EnvGuard {
        let previous: Vec<_> = self
            .vars
            .iter()
            .map(|(k, _)| (k.clone(), env::var(k).ok()))
            .collect();

        self.apply();

        EnvGuard { previous }
    }
}

impl Default for EnvBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Guard that restores environment variables on drop
pub struct EnvGuard {
    previous: Vec<(String, Option<String>)>,
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.previous {
            match value {
                Some(v) => env::set_var(key, v),
                None => env::remove_var(key),
            }
        }
    }
}

/// Print all SUITE_ENGINE environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_GREP         Only run tests whose full title matches");
    println!("  {ENV_PREFIX}_INVERT       Invert the pattern (true/false)");
    println!("  {ENV_PREFIX}_BAIL         Stop after the first failure (true/false)");
    println!("  {ENV_PREFIX}_SHARD        Only run tests of this shard");
    println!("  {ENV_PREFIX}_TIMEOUT      Default timeout in milliseconds (0 disables)");
    println!("  {ENV_PREFIX}_RETRIES      Default retries per test");
    println!("  {ENV_PREFIX}_CHECK_LEAKS  Fail runnables that leak globals (true/false)");
    println!("  {ENV_PREFIX}_REPORTER     Reporter (console, json, json-stream, xunit, silent)");
    println!("  {ENV_PREFIX}_CONFIG       Path to configuration file");
    println!("  {ENV_PREFIX}_GLOBALS      Extra allowed globals, comma separated");
    println!();
    println!("Example:");
    println!("  export {ENV_PREFIX}_GREP='^api '");
    println!("  export {ENV_PREFIX}_CHECK_LEAKS=true");
    println!("  suite-engine run plan.yaml");
}
