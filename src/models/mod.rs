//! Data models for suite execution
//!
//! The suite tree, its runnables and bodies, failures, and run events.

mod body;
mod event;
mod failure;
mod runnable;
mod suite;

pub use body::{Body, BodyFuture, Completion, Context, Done};
pub(crate) use body::{ContextSeed, DoneReceiver};
pub use event::{
    ChannelSink, EventKind, EventLog, EventSink, Fanout, RunEvent, RunnableInfo, SuiteInfo,
};
pub use failure::{Failure, Raised};
pub use runnable::{
    HookDef, HookPhase, RunState, Runnable, RunnableId, RunnableKind, TestDef,
};
pub use suite::{Suite, SuiteId, SuiteTree, DEFAULT_TIMEOUT};
