//! Runnable bodies and the context handed to them

use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use super::failure::{Failure, Raised};
use crate::executor::{AbortHandle, GlobalScope, UncaughtHandle};

/// Future returned by a body
pub type BodyFuture = BoxFuture<'static, Result<(), Raised>>;

type BodyFn = dyn Fn(Context) -> BodyFuture + Send + Sync;

/// How a body signals that it is finished
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Completion {
    /// Finishes when the call returns
    Sync,
    /// Finishes when the returned future settles
    Settle,
    /// Finishes when [`Done`] is signalled; the returned future only reports errors
    Callback,
}

/// The executable part of a test or hook
#[derive(Clone)]
pub struct Body {
    func: Arc<BodyFn>,
    completion: Completion,
}

impl Body {
    /// Plain function body
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(&Context) -> Result<(), Raised> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self {
            func: Arc::new(move |ctx: Context| {
                let f = Arc::clone(&f);
                Box::pin(async move { f(&ctx) }) as BodyFuture
            }),
            completion: Completion::Sync,
        }
    }

    /// Body that finishes when its future resolves
    pub fn future<F, Fut>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Raised>> + Send + 'static,
    {
        Self {
            func: Arc::new(move |ctx: Context| Box::pin(f(ctx)) as BodyFuture),
            completion: Completion::Settle,
        }
    }

    /// Body that finishes through `ctx.done()`
    pub fn callback<F, Fut>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Raised>> + Send + 'static,
    {
        Self {
            func: Arc::new(move |ctx: Context| Box::pin(f(ctx)) as BodyFuture),
            completion: Completion::Callback,
        }
    }

    pub fn completion(&self) -> Completion {
        self.completion
    }

    pub(crate) fn call(&self, ctx: Context) -> BodyFuture {
        (self.func)(ctx)
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Body")
            .field("completion", &self.completion)
            .finish_non_exhaustive()
    }
}

/// Explicit completion callback of a running body.
///
/// Only the first signal counts; later ones are ignored.
#[derive(Clone, Debug)]
pub struct Done {
    tx: mpsc::UnboundedSender<Result<(), Raised>>,
}

pub(crate) type DoneReceiver = mpsc::UnboundedReceiver<Result<(), Raised>>;

impl Done {
    pub fn ok(&self) {
        self.complete(Ok(()));
    }

    pub fn fail(&self, err: impl Into<Raised>) {
        self.complete(Err(err.into()));
    }

    pub fn skip(&self) {
        self.complete(Err(Raised::Pending));
    }

    pub fn complete(&self, result: Result<(), Raised>) {
        // The receiver is gone once the runnable settled.
        let _ = self.tx.send(result);
    }
}

/// Handles shared with a body while it runs
#[derive(Clone, Debug)]
pub struct Context {
    title: Arc<str>,
    attempt: u32,
    current_test: Option<Arc<str>>,
    globals: GlobalScope,
    done: Done,
    uncaught: UncaughtHandle,
    abort: AbortHandle,
    test_error: Arc<Mutex<Option<Failure>>>,
}

/// Everything the engine knows when it builds a [`Context`]
pub(crate) struct ContextSeed {
    pub title: String,
    pub attempt: u32,
    pub current_test: Option<String>,
    pub globals: GlobalScope,
    pub uncaught: UncaughtHandle,
    pub abort: AbortHandle,
}

impl Context {
    pub(crate) fn new(seed: ContextSeed) -> (Self, DoneReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let ctx = Self {
            title: seed.title.into(),
            attempt: seed.attempt,
            current_test: seed.current_test.map(Into::into),
            globals: seed.globals,
            done: Done { tx },
            uncaught: seed.uncaught,
            abort: seed.abort,
            test_error: Arc::new(Mutex::new(None)),
        };
        (ctx, rx)
    }

    /// Title of the running test or hook
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Retry counter of the running attempt (0 for the first)
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// For hooks: title of the test the hook runs for
    pub fn current_test(&self) -> Option<&str> {
        self.current_test.as_deref()
    }

    /// Ambient global bindings, watched for leaks
    pub fn globals(&self) -> &GlobalScope {
        &self.globals
    }

    pub fn done(&self) -> &Done {
        &self.done
    }

    /// Value to return to mark the runnable pending
    pub fn skip(&self) -> Raised {
        Raised::Pending
    }

    /// Report an error that escaped the normal completion path
    pub fn report_uncaught(&self, err: impl Into<Raised>) {
        self.uncaught.report(err);
    }

    pub fn uncaught_handle(&self) -> UncaughtHandle {
        self.uncaught.clone()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// From a hook: fail the current test once the hook completes
    pub fn fail_current_test(&self, err: impl Into<Raised>) {
        let failure = err
            .into()
            .into_failure()
            .unwrap_or_else(|| Failure::assertion("skip is not a test failure"));
        let mut slot = self.test_error.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(failure);
    }

    pub(crate) fn take_test_error(&self) -> Option<Failure> {
        self.test_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }
}
