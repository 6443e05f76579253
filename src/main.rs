//! Suite Engine CLI
//!
//! ```bash
//! # Run a plan with the console reporter
//! suite-engine run plan.yaml
//!
//! # Only the api tests of shard 2, stop at the first failure
//! suite-engine run plan.yaml --grep '^api ' --shard 2 --bail
//!
//! # Write a JSON report
//! suite-engine run plan.yaml -R json -o reports/run.json
//!
//! # See what would run
//! suite-engine list plan.yaml --pending
//!
//! # Create a configuration file
//! suite-engine config init
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::process::ExitCode;
use tracing::{debug, info, warn};

use suite_engine::cli::{self, Args};
use suite_engine::config::env::{print_env_help, EnvConfig};
use suite_engine::config::file::ConfigFile;
use suite_engine::config::RunConfig;
use suite_engine::executor::Engine;
use suite_engine::models::Fanout;
use suite_engine::output::ReporterKind;
use suite_engine::plan::Plan;
use suite_engine::utils::logger::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config = match &args.command {
        cli::Command::Run(run) => Some(resolve_config(run.select.config.as_deref())?),
        cli::Command::List(list) => Some(resolve_config(list.select.config.as_deref())?),
        cli::Command::Config(_) => None,
    };
    init_logger(log_level(&args, config.as_ref())?);

    let code = match args.command {
        cli::Command::Run(run_args) => {
            let config = config.unwrap_or_default();
            let failures = run_plan(run_args, config).await?;
            exit_status(failures)
        }
        cli::Command::List(list_args) => {
            list_tests(list_args, config.unwrap_or_default())?;
            0
        }
        cli::Command::Config(config_args) => {
            manage_config(config_args)?;
            0
        }
    };

    Ok(ExitCode::from(code))
}

/// Failure count as a process status, saturating at 255
fn exit_status(failures: usize) -> u8 {
    u8::try_from(failures).unwrap_or(u8::MAX)
}

/// Config file, then environment; flags are layered on by each command
fn resolve_config(explicit: Option<&Path>) -> Result<RunConfig> {
    let env = EnvConfig::load();
    let path = explicit
        .map(Path::to_path_buf)
        .or_else(|| env.config_file.as_ref().map(Into::into))
        .or_else(ConfigFile::find);

    let mut config = match path {
        Some(path) => {
            debug!("Using config file {}", path.display());
            ConfigFile::load(&path)?.run
        }
        None => RunConfig::default(),
    };
    env.apply(&mut config);
    Ok(config)
}

fn log_level(args: &Args, config: Option<&RunConfig>) -> Result<LogLevel> {
    let name = match (&args.log_level, args.verbose) {
        (Some(level), _) => level.as_str(),
        (None, true) => "debug",
        (None, false) => config.map(|c| c.log_level.as_str()).unwrap_or("warn"),
    };
    LogLevel::from_str(name).ok_or_else(|| anyhow::anyhow!("Unknown log level: {}", name))
}

async fn run_plan(args: cli::RunArgs, mut config: RunConfig) -> Result<usize> {
    args.apply_to(&mut config);

    let plan = Plan::load(&args.plan)
        .with_context(|| format!("Failed to load plan: {}", args.plan.display()))?;
    let tree = plan.build_with_defaults(config.timeout(), config.retries);
    let filter = config.filter()?;

    let reporter = ReporterKind::from_str(&config.reporter)
        .ok_or_else(|| anyhow::anyhow!("Unknown reporter: {}", config.reporter))?;
    let mut sink = Fanout::new();
    sink.push(reporter.build(config.output.as_deref().map(Path::new), config.color));

    let mut engine = Engine::new(tree, config.engine_options(), sink).with_filter(filter);
    info!(
        "Running {} ({} tests, reporter {})",
        args.plan.display(),
        engine.total(),
        reporter
    );

    let abort = engine.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, aborting run");
            abort.abort();
        }
    });

    if config.delay {
        // Plans have no setup of their own; start once the engine is waiting.
        if let Some(ready) = engine.ready_handle() {
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                ready.ready();
            });
        }
    }

    let failures = engine.run().await?;
    if let Some(output) = &config.output {
        if matches!(
            reporter,
            ReporterKind::Json | ReporterKind::JsonStream | ReporterKind::Xunit
        ) {
            eprintln!("Report written to {}", output);
        }
    }
    Ok(failures)
}

fn list_tests(args: cli::ListArgs, mut config: RunConfig) -> Result<()> {
    args.select.apply_to(&mut config);

    let plan = Plan::load(&args.plan)
        .with_context(|| format!("Failed to load plan: {}", args.plan.display()))?;
    let mut tree = plan.build();
    let root = tree.root();
    if !config.forbid_only && tree.has_only(root) {
        tree.filter_only(root);
    }
    let filter = config.filter()?;

    let mut selected = Vec::new();
    tree.each_test(root, |test| {
        if filter.selects(&tree, test) {
            selected.push(test);
        }
    });

    let mut listed = 0;
    for test in selected {
        let pending = tree.is_pending(test);
        if pending && !args.pending {
            continue;
        }
        let shard = tree
            .runnable(test)
            .shard()
            .map(|s| format!(" [shard {}]", s))
            .unwrap_or_default();
        let marker = if pending { " (pending)" } else { "" };
        println!("{}{}{}", tree.full_title(test), shard, marker);
        listed += 1;
    }

    println!();
    println!("{} of {} tests selected", listed, tree.total(root));
    Ok(())
}

fn manage_config(args: cli::ConfigArgs) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { output, force } => {
            let path = Path::new(&output);
            if path.exists() && !force {
                anyhow::bail!(
                    "Configuration file already exists: {output}. Use --force to overwrite."
                );
            }

            let config = ConfigFile::example();
            config.save(path)?;
            println!("✓ Configuration file created: {output}");
            println!("\nEdit the file to customize your settings.");
        }

        cli::ConfigAction::Show { format } => {
            let mut config = ConfigFile::load_default()?;
            EnvConfig::load().apply(&mut config.run);
            let output = if format == "json" {
                serde_json::to_string_pretty(&config)?
            } else {
                serde_yaml::to_string(&config)?
            };
            println!("{output}");
        }

        cli::ConfigAction::Env { help_vars } => {
            if help_vars {
                print_env_help();
            } else {
                EnvConfig::load().print_summary();
            }
        }

        cli::ConfigAction::Validate { file } => {
            let path = file.unwrap_or_else(|| {
                ConfigFile::find()
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_else(|| "./suite-engine.yaml".to_string())
            });

            match ConfigFile::load(&path) {
                Ok(_) => {
                    println!("✓ Configuration file is valid: {path}");
                }
                Err(e) => {
                    println!("✗ Configuration file is invalid: {path}");
                    println!("  Error: {e:#}");
                    return Err(e);
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_status_saturates() {
        assert_eq!(exit_status(0), 0);
        assert_eq!(exit_status(3), 3);
        assert_eq!(exit_status(255), 255);
        assert_eq!(exit_status(1024), 255);
    }
}
