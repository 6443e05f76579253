//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::RunConfig;

/// Hierarchical test-suite runner
#[derive(Parser, Debug)]
#[command(name = "suite-engine")]
#[command(version)]
#[command(about = "Run suite plans with hooks, retries, bail and leak detection")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output (debug logging)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    pub log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a plan
    Run(RunArgs),

    /// List the tests a run would select
    List(ListArgs),

    /// Manage configuration
    Config(ConfigArgs),
}

/// Selection flags shared by `run` and `list`
#[derive(Parser, Debug, Default)]
pub struct SelectArgs {
    /// Only run tests whose full title matches this pattern
    #[arg(short, long)]
    pub grep: Option<String>,

    /// Never run tests whose full title matches this pattern
    #[arg(long)]
    pub exclude: Option<String>,

    /// Invert the --grep match
    #[arg(short, long)]
    pub invert: bool,

    /// Skip the test with this full title (repeatable)
    #[arg(long = "skip-title")]
    pub skip_titles: Vec<String>,

    /// Only run tests of this shard
    #[arg(long)]
    pub shard: Option<u32>,

    /// Fail on exclusivity markers instead of honouring them
    #[arg(long)]
    pub forbid_only: bool,

    /// Configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Plan file (YAML or JSON)
    pub plan: PathBuf,

    #[command(flatten)]
    pub select: SelectArgs,

    /// Stop after the first failure
    #[arg(short, long)]
    pub bail: bool,

    /// Wait for the start signal before running
    #[arg(long)]
    pub delay: bool,

    /// Fail tests and hooks that leak globals
    #[arg(long)]
    pub check_leaks: bool,

    /// Allow a global name, `*` suffix allowed (repeatable)
    #[arg(long = "global")]
    pub globals: Vec<String>,

    /// Fail pending tests
    #[arg(long)]
    pub forbid_pending: bool,

    /// Require asynchronous bodies
    #[arg(long)]
    pub async_only: bool,

    /// Default timeout in milliseconds (0 disables)
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Default retries per test
    #[arg(long)]
    pub retries: Option<u32>,

    /// Reporter (console, json, json-stream, xunit, silent)
    #[arg(short = 'R', long)]
    pub reporter: Option<String>,

    /// Write the report to a file
    #[arg(short, long)]
    pub output: Option<String>,

    /// Disable colors
    #[arg(long)]
    pub no_color: bool,
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Plan file (YAML or JSON)
    pub plan: PathBuf,

    #[command(flatten)]
    pub select: SelectArgs,

    /// Include pending tests
    #[arg(short, long)]
    pub pending: bool,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Create an example configuration file
    Init {
        /// Output path
        #[arg(short, long, default_value = "suite-engine.yaml")]
        output: String,

        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Show the effective configuration
    Show {
        /// Output format (yaml, json)
        #[arg(short, long, default_value = "yaml")]
        format: String,
    },

    /// Show environment variables
    Env {
        /// Show help for every variable
        #[arg(long)]
        help_vars: bool,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file
        file: Option<String>,
    },
}

impl SelectArgs {
    pub fn apply_to(&self, config: &mut RunConfig) {
        if self.grep.is_some() {
            config.pattern = self.grep.clone();
        }
        if self.exclude.is_some() {
            config.exclude_pattern = self.exclude.clone();
        }
        if self.shard.is_some() {
            config.shard = self.shard;
        }
        config.invert |= self.invert;
        config.forbid_only |= self.forbid_only;
        for title in &self.skip_titles {
            if !config.exclude_titles.contains(title) {
                config.exclude_titles.push(title.clone());
            }
        }
    }
}

impl RunArgs {
    /// Layer the flags over an already merged configuration
    pub fn apply_to(&self, config: &mut RunConfig) {
        self.select.apply_to(config);
        config.bail |= self.bail;
        config.delay |= self.delay;
        config.check_leaks |= self.check_leaks;
        config.forbid_pending |= self.forbid_pending;
        config.async_only |= self.async_only;
        for name in &self.globals {
            if !config.allowed_globals.contains(name) {
                config.allowed_globals.push(name.clone());
            }
        }
        if self.timeout.is_some() {
            config.timeout_ms = self.timeout;
        }
        if self.retries.is_some() {
            config.retries = self.retries;
        }
        if let Some(reporter) = &self.reporter {
            config.reporter = reporter.clone();
        }
        if self.output.is_some() {
            config.output = self.output.clone();
        }
        if self.no_color {
            config.color = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_args_parsing() {
        let args = Args::parse_from([
            "suite-engine",
            "run",
            "plan.yaml",
            "--grep",
            "^api",
            "--bail",
            "--global",
            "fixture*",
            "--global",
            "session",
            "--skip-title",
            "api login",
            "--shard",
            "2",
            "-R",
            "json",
            "-t",
            "0",
        ]);
        match args.command {
            Command::Run(run) => {
                assert_eq!(run.plan, PathBuf::from("plan.yaml"));
                assert_eq!(run.select.grep.as_deref(), Some("^api"));
                assert!(run.bail);
                assert_eq!(run.globals, vec!["fixture*", "session"]);
                assert_eq!(run.select.shard, Some(2));
                assert_eq!(run.timeout, Some(0));

                let mut config = RunConfig::default();
                run.apply_to(&mut config);
                assert_eq!(config.pattern.as_deref(), Some("^api"));
                assert_eq!(config.exclude_titles, vec!["api login"]);
                assert_eq!(config.reporter, "json");
                assert_eq!(config.timeout_ms, Some(0));
                assert!(config.bail);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_list_args() {
        let args = Args::parse_from(["suite-engine", "-v", "list", "plan.json", "--pending"]);
        assert!(args.verbose);
        match args.command {
            Command::List(list) => {
                assert!(list.pending);
                assert!(list.select.grep.is_none());
            }
            _ => panic!("Expected List command"),
        }
    }

    #[test]
    fn test_config_args() {
        let args = Args::parse_from(["suite-engine", "config", "init", "--force"]);
        match args.command {
            Command::Config(ConfigArgs {
                action: ConfigAction::Init { output, force },
            }) => {
                assert_eq!(output, "suite-engine.yaml");
                assert!(force);
            }
            _ => panic!("Expected Config init"),
        }
    }
}
