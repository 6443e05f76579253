//! Single runnable execution
//!
//! Runs one body until its first completion signal: the body settling, an
//! explicit `done`, an uncaught error, abort, or the timeout.

use futures::future::{self, FutureExt};
use std::panic::AssertUnwindSafe;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::trace;

use crate::models::{Body, Completion, Context, DoneReceiver, Failure, Raised};
use crate::utils::timer::Timer;

/// How a runnable finished
#[derive(Debug)]
pub(crate) struct Settled {
    pub result: Result<(), Raised>,
    pub duration: Duration,
}

/// Receivers the engine lends to every execution
pub(crate) struct Signals<'a> {
    pub uncaught: &'a mut mpsc::UnboundedReceiver<Failure>,
    pub abort: &'a mut watch::Receiver<bool>,
}

/// Execute `body` with `ctx`; a missing body completes immediately
pub(crate) async fn run_body(
    body: Option<Body>,
    ctx: Context,
    mut done: DoneReceiver,
    timeout: Duration,
    async_only: bool,
    signals: Signals<'_>,
) -> Settled {
    let timer = Timer::start(ctx.title());
    let Some(body) = body else {
        return Settled {
            result: Ok(()),
            duration: timer.stop(),
        };
    };
    if async_only && body.completion() == Completion::Sync {
        return Settled {
            result: Err(Failure::AsyncOnly.into()),
            duration: timer.stop(),
        };
    }

    let callback = body.completion() == Completion::Callback;
    let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| body.call(ctx))) {
        Ok(fut) => fut,
        Err(payload) => {
            return Settled {
                result: Err(Failure::from_panic(payload).into()),
                duration: timer.stop(),
            }
        }
    };
    let settle = async move {
        match AssertUnwindSafe(fut).catch_unwind().await {
            // callback bodies finish through `done`
            Ok(Ok(())) if callback => future::pending().await,
            Ok(result) => result,
            Err(payload) => Err(Failure::from_panic(payload).into()),
        }
    };
    let watchdog = async {
        if timeout.is_zero() {
            future::pending::<()>().await
        } else {
            tokio::time::sleep(timeout).await
        }
    };
    tokio::pin!(settle, watchdog);

    let Signals { uncaught, abort } = signals;
    let mut result = tokio::select! {
        biased;
        result = &mut settle => result,
        Some(result) = done.recv() => result,
        Some(failure) = uncaught.recv() => {
            trace!("uncaught error while running: {}", failure);
            Err(failure.into())
        }
        Ok(_) = abort.wait_for(|aborted| *aborted) => Err(Failure::Aborted.into()),
        _ = &mut watchdog => Err(timeout_failure(timeout).into()),
    };

    let duration = timer.stop();
    if result.is_ok() && !timeout.is_zero() && duration > timeout {
        result = Err(timeout_failure(timeout).into());
    }
    Settled { result, duration }
}

fn timeout_failure(timeout: Duration) -> Failure {
    Failure::Timeout {
        ms: timeout.as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{AbortHandle, GlobalScope, UncaughtHandle};
    use crate::models::ContextSeed;

    struct Harness {
        uncaught: UncaughtHandle,
        uncaught_rx: mpsc::UnboundedReceiver<Failure>,
        abort: AbortHandle,
        abort_rx: watch::Receiver<bool>,
    }

    impl Harness {
        fn new() -> Self {
            let (uncaught, uncaught_rx) = UncaughtHandle::new();
            let (abort, abort_rx) = AbortHandle::new();
            Self {
                uncaught,
                uncaught_rx,
                abort,
                abort_rx,
            }
        }

        async fn run(&mut self, body: Body, timeout_ms: u64) -> Settled {
            self.run_with(body, timeout_ms, false).await
        }

        async fn run_with(&mut self, body: Body, timeout_ms: u64, async_only: bool) -> Settled {
            let (ctx, done) = Context::new(ContextSeed {
                title: "body".to_string(),
                attempt: 0,
                current_test: None,
                globals: GlobalScope::new(),
                uncaught: self.uncaught.clone(),
                abort: self.abort.clone(),
            });
            run_body(
                Some(body),
                ctx,
                done,
                Duration::from_millis(timeout_ms),
                async_only,
                Signals {
                    uncaught: &mut self.uncaught_rx,
                    abort: &mut self.abort_rx,
                },
            )
            .await
        }
    }

    fn failure(settled: Settled) -> Failure {
        settled.result.unwrap_err().into_failure().unwrap()
    }

    #[tokio::test]
    async fn test_sync_body_passes() {
        let mut h = Harness::new();
        let settled = h.run(Body::sync(|_| Ok(())), 100).await;
        assert!(settled.result.is_ok());
    }

    #[tokio::test]
    async fn test_panic_becomes_assertion() {
        let mut h = Harness::new();
        let settled = h.run(Body::sync(|_| panic!("expected 1, got 2")), 100).await;
        assert_eq!(failure(settled).message(), "expected 1, got 2");
    }

    #[tokio::test]
    async fn test_callback_waits_for_done() {
        let mut h = Harness::new();
        let body = Body::callback(|ctx| async move {
            let done = ctx.done().clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                done.ok();
                done.fail(Failure::assertion("ignored"));
            });
            Ok(())
        });
        let settled = h.run(body, 500).await;
        assert!(settled.result.is_ok());
        assert!(settled.duration >= Duration::from_millis(5));
    }

    #[tokio::test]
    async fn test_callback_never_done_times_out() {
        let mut h = Harness::new();
        let body = Body::callback(|_| async { Ok(()) });
        let failure = failure(h.run(body, 20).await);
        assert!(failure.is_timeout());
        assert!(failure.message().starts_with("Timeout of 20ms exceeded."));
    }

    #[tokio::test]
    async fn test_zero_timeout_disables_watchdog() {
        let mut h = Harness::new();
        let body = Body::future(|_| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(())
        });
        assert!(h.run(body, 0).await.result.is_ok());
    }

    #[tokio::test]
    async fn test_slow_sync_body_times_out() {
        let mut h = Harness::new();
        let body = Body::sync(|_| {
            std::thread::sleep(Duration::from_millis(30));
            Ok(())
        });
        assert!(failure(h.run(body, 10).await).is_timeout());
    }

    #[tokio::test]
    async fn test_uncaught_error_fails_running_body() {
        let mut h = Harness::new();
        let body = Body::callback(|ctx| async move {
            ctx.report_uncaught(Failure::assertion("escaped"));
            Ok(())
        });
        let failure = failure(h.run(body, 500).await);
        assert!(failure.is_uncaught());
        assert_eq!(failure.message(), "escaped");
    }

    #[tokio::test]
    async fn test_abort_unblocks_waiter() {
        let mut h = Harness::new();
        let body = Body::callback(|ctx| async move {
            ctx.abort_handle().abort();
            Ok(())
        });
        assert_eq!(failure(h.run(body, 0).await), Failure::Aborted);
    }

    #[tokio::test]
    async fn test_async_only_rejects_sync_body() {
        let mut h = Harness::new();
        let settled = h.run_with(Body::sync(|_| Ok(())), 100, true).await;
        assert_eq!(failure(settled), Failure::AsyncOnly);
        let body = Body::future(|_| async { Ok(()) });
        assert!(h.run_with(body, 100, true).await.result.is_ok());
    }

    #[tokio::test]
    async fn test_skip_is_returned_as_pending() {
        let mut h = Harness::new();
        let settled = h.run(Body::sync(|ctx| Err(ctx.skip())), 100).await;
        assert!(settled.result.unwrap_err().is_pending());
    }
}
