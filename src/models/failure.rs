//! Failure models
//!
//! Errors recorded on runnables and carried by `fail` events.

use serde::{Deserialize, Serialize};
use std::any::Any;
use thiserror::Error;

/// Why a runnable failed
#[derive(Error, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Failure {
    /// Raised inside a body (including panics)
    #[error("{message}")]
    Assertion {
        message: String,
        stack: Option<String>,
    },

    /// A body raised something that is not an error
    #[error("the {type_name} {value} was thrown, throw an Error :)")]
    NonError { type_name: String, value: String },

    #[error(
        "Timeout of {ms}ms exceeded. For async tests and hooks, ensure \"done()\" is called; \
         if returning a future, ensure it resolves."
    )]
    Timeout { ms: u64 },

    #[error("{}", leak_message(.names))]
    GlobalLeak { names: Vec<String> },

    /// Escaped the normal completion path of a runnable
    #[error("{message}")]
    Uncaught {
        message: String,
        stack: Option<String>,
    },

    #[error("aborted")]
    Aborted,

    #[error("{message}")]
    Forbidden { message: String },

    #[error("--async-only option in use without declaring `done()` or returning a future")]
    AsyncOnly,
}

fn leak_message(names: &[String]) -> String {
    if names.len() > 1 {
        format!("global leaks detected: {}", names.join(", "))
    } else {
        format!("global leak detected: {}", names.join(""))
    }
}

impl Failure {
    /// Failure with a plain message
    pub fn assertion(message: impl Into<String>) -> Self {
        Failure::Assertion {
            message: message.into(),
            stack: None,
        }
    }

    /// Uncaught failure with a plain message
    pub fn uncaught(message: impl Into<String>) -> Self {
        Failure::Uncaught {
            message: message.into(),
            stack: None,
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Failure::Forbidden {
            message: message.into(),
        }
    }

    /// Build from an `anyhow` error, keeping the cause chain as the stack
    pub fn from_error(err: &anyhow::Error) -> Self {
        Failure::Assertion {
            message: err.to_string(),
            stack: error_stack(err),
        }
    }

    /// Wrap a non-error value into an error-shaped failure
    pub fn non_error(value: &serde_json::Value) -> Self {
        Failure::NonError {
            type_name: json_type_name(value).to_string(),
            value: value.to_string(),
        }
    }

    /// Convert a caught panic payload
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            return Failure::NonError {
                type_name: "panic payload".to_string(),
                value: "<opaque>".to_string(),
            };
        };
        Failure::Assertion {
            message,
            stack: None,
        }
    }

    /// Re-tag this failure as having escaped its runnable
    pub fn into_uncaught(self) -> Self {
        match self {
            Failure::Assertion { message, stack } | Failure::Uncaught { message, stack } => {
                Failure::Uncaught { message, stack }
            }
            other => Failure::Uncaught {
                message: other.to_string(),
                stack: None,
            },
        }
    }

    pub fn message(&self) -> String {
        self.to_string()
    }

    pub fn stack(&self) -> Option<&str> {
        match self {
            Failure::Assertion { stack, .. } | Failure::Uncaught { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Failure::Timeout { .. })
    }

    pub fn is_uncaught(&self) -> bool {
        matches!(self, Failure::Uncaught { .. })
    }
}

fn error_stack(err: &anyhow::Error) -> Option<String> {
    if err.chain().count() > 1 {
        Some(format!("{err:?}"))
    } else {
        None
    }
}

fn json_type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}

/// What a body hands back on its error path
#[derive(Debug)]
pub enum Raised {
    Error(Failure),
    /// A value that is not an error
    Value(serde_json::Value),
    /// Explicit skip; the runnable becomes pending
    Pending,
}

impl Raised {
    pub fn is_pending(&self) -> bool {
        matches!(self, Raised::Pending)
    }

    /// Normalise to a failure; `None` for the skip signal
    pub fn into_failure(self) -> Option<Failure> {
        match self {
            Raised::Error(failure) => Some(failure),
            Raised::Value(value) => Some(Failure::non_error(&value)),
            Raised::Pending => None,
        }
    }
}

impl From<Failure> for Raised {
    fn from(failure: Failure) -> Self {
        Raised::Error(failure)
    }
}

impl From<anyhow::Error> for Raised {
    fn from(err: anyhow::Error) -> Self {
        Raised::Error(Failure::from_error(&err))
    }
}

impl From<serde_json::Value> for Raised {
    fn from(value: serde_json::Value) -> Self {
        Raised::Value(value)
    }
}
