//! Scripted body steps

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::models::{Body, Context, Failure, Raised};

/// How a scripted body reports completion
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    #[default]
    Sync,
    Future,
    Callback,
}

/// One action of a scripted body
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "do", rename_all = "kebab-case")]
pub enum Step {
    Pass,
    Fail { message: String },
    /// Raise a value that is not an error
    Throw { value: serde_json::Value },
    Panic { message: String },
    Skip,
    Sleep { ms: u64 },
    Define { name: String },
    Remove { name: String },
    Uncaught { message: String },
    /// Stop here without ever completing
    NeverDone,
    /// Fail every attempt below the given retry number
    FailUntil { attempt: u32 },
    /// Hooks only: fail the test the hook runs for
    FailTest { message: String },
    Abort,
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Pass => "pass",
            Step::Fail { .. } => "fail",
            Step::Throw { .. } => "throw",
            Step::Panic { .. } => "panic",
            Step::Skip => "skip",
            Step::Sleep { .. } => "sleep",
            Step::Define { .. } => "define",
            Step::Remove { .. } => "remove",
            Step::Uncaught { .. } => "uncaught",
            Step::NeverDone => "never-done",
            Step::FailUntil { .. } => "fail-until",
            Step::FailTest { .. } => "fail-test",
            Step::Abort => "abort",
        }
    }

    /// Apply everything but the delay. `Ok(false)` stops the script without completing.
    fn apply(&self, ctx: &Context) -> Result<bool, Raised> {
        match self {
            Step::Pass | Step::Sleep { .. } => Ok(true),
            Step::Fail { message } => Err(Failure::assertion(message.as_str()).into()),
            Step::Throw { value } => Err(value.clone().into()),
            Step::Panic { message } => std::panic::panic_any(message.clone()),
            Step::Skip => Err(ctx.skip()),
            Step::Define { name } => {
                ctx.globals().define(name.as_str());
                Ok(true)
            }
            Step::Remove { name } => {
                ctx.globals().remove(name);
                Ok(true)
            }
            Step::Uncaught { message } => {
                ctx.report_uncaught(Failure::assertion(message.as_str()));
                Ok(true)
            }
            Step::NeverDone => Ok(false),
            Step::FailUntil { attempt } => {
                if ctx.attempt() < *attempt {
                    Err(Failure::assertion(format!("attempt {} failed", ctx.attempt())).into())
                } else {
                    Ok(true)
                }
            }
            Step::FailTest { message } => {
                ctx.fail_current_test(Failure::assertion(message.as_str()));
                Ok(true)
            }
            Step::Abort => {
                ctx.abort_handle().abort();
                Ok(true)
            }
        }
    }
}

fn run_blocking(steps: &[Step], ctx: &Context) -> Result<(), Raised> {
    for step in steps {
        if let Step::Sleep { ms } = step {
            std::thread::sleep(Duration::from_millis(*ms));
        }
        if !step.apply(ctx)? {
            break;
        }
    }
    Ok(())
}

async fn run_async(steps: &[Step], ctx: &Context) -> Result<bool, Raised> {
    for step in steps {
        if let Step::Sleep { ms } = step {
            tokio::time::sleep(Duration::from_millis(*ms)).await;
        }
        if !step.apply(ctx)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Compile a script into a body of the given style
pub fn script(steps: Vec<Step>, style: Style) -> Body {
    let steps: Arc<[Step]> = steps.into();
    match style {
        Style::Sync => Body::sync(move |ctx| run_blocking(&steps, ctx)),
        Style::Future => Body::future(move |ctx| {
            let steps = Arc::clone(&steps);
            async move {
                if !run_async(&steps, &ctx).await? {
                    futures::future::pending::<()>().await;
                }
                Ok(())
            }
        }),
        Style::Callback => Body::callback(move |ctx| {
            let steps = Arc::clone(&steps);
            async move {
                match run_async(&steps, &ctx).await {
                    Ok(true) => ctx.done().ok(),
                    Ok(false) => {}
                    Err(raised) => ctx.done().complete(Err(raised)),
                }
                Ok(())
            }
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_yaml() {
        let yaml = r#"
- do: pass
- do: fail
  message: boom
- do: throw
  value: 42
- do: sleep
  ms: 5
- do: never-done
- do: fail-until
  attempt: 2
"#;
        let steps: Vec<Step> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(steps.len(), 6);
        assert_eq!(steps[1], Step::Fail { message: "boom".into() });
        assert_eq!(steps[2], Step::Throw { value: serde_json::json!(42) });
        assert_eq!(steps[4].name(), "never-done");
        assert_eq!(steps[5], Step::FailUntil { attempt: 2 });
    }

    #[test]
    fn test_style_names() {
        let style: Style = serde_yaml::from_str("callback").unwrap();
        assert_eq!(style, Style::Callback);
        assert_eq!(Style::default(), Style::Sync);
    }

    #[test]
    fn test_unknown_step_rejected() {
        let result: Result<Vec<Step>, _> = serde_yaml::from_str("- do: explode");
        assert!(result.is_err());
    }
}
