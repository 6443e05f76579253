//! Run control handles
//!
//! Cloneable handles bodies and embedders use to reach a running engine.

use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::models::{Failure, Raised};

/// Requests the run to stop scheduling new work
#[derive(Clone, Debug)]
pub struct AbortHandle {
    tx: std::sync::Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    pub(crate) fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                tx: std::sync::Arc::new(tx),
            },
            rx,
        )
    }

    /// Abort the run; a running runnable fails with "aborted". Idempotent.
    pub fn abort(&self) {
        let changed = self.tx.send_if_modified(|aborted| {
            let changed = !*aborted;
            *aborted = true;
            changed
        });
        if changed {
            debug!("aborting");
        }
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Reports errors that escaped the normal completion path of a runnable
#[derive(Clone, Debug)]
pub struct UncaughtHandle {
    tx: mpsc::UnboundedSender<Failure>,
}

impl UncaughtHandle {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Failure>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Report an error. A skip signal carries no error and is dropped.
    pub fn report(&self, err: impl Into<Raised>) {
        let Some(failure) = err.into().into_failure() else {
            return;
        };
        // Ignored once the engine is gone.
        let _ = self.tx.send(failure.into_uncaught());
    }
}

/// Delay mode: signals that the suite tree is complete
#[derive(Debug)]
pub struct ReadyHandle {
    tx: oneshot::Sender<()>,
}

impl ReadyHandle {
    pub(crate) fn new() -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub fn ready(self) {
        let _ = self.tx.send(());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_is_idempotent() {
        let (handle, rx) = AbortHandle::new();
        assert!(!handle.is_aborted());
        handle.abort();
        handle.abort();
        assert!(handle.is_aborted());
        assert!(*rx.borrow());
    }

    #[test]
    fn test_uncaught_report_drops_skip() {
        let (handle, mut rx) = UncaughtHandle::new();
        handle.report(Raised::Pending);
        handle.report(Failure::assertion("late"));
        let failure = rx.try_recv().unwrap();
        assert!(failure.is_uncaught());
        assert_eq!(failure.message(), "late");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ready_signal() {
        let (handle, rx) = ReadyHandle::new();
        handle.ready();
        assert!(rx.await.is_ok());
    }

    #[test]
    fn test_ready_handle_dropped() {
        let (handle, rx) = ReadyHandle::new();
        drop(handle);
        assert!(tokio_test::block_on(rx).is_err());
    }
}
