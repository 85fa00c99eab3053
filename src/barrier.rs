//! Completion barriers
//!
//! One barrier covers the whole task graph; task groups and waiters on a
//! single producer get their own. Each counts actions that are not
//! finished yet. [`CompletionBarrier::wait`]
//! returns a future that resolves once the count is back to zero, or as soon
//! as an unrecoverable failure is recorded. Dropping the future cancels the
//! wait without side effects.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::Error;

#[derive(Debug, Clone, Default)]
struct BarrierState {
    pending: usize,
    failure: Option<Arc<Error>>,
}

/// Outstanding-work counter with a sticky failure
#[derive(Debug)]
pub struct CompletionBarrier {
    state: watch::Sender<BarrierState>,
}

impl Default for CompletionBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl CompletionBarrier {
    pub fn new() -> Self {
        let (state, _) = watch::channel(BarrierState::default());
        Self { state }
    }

    /// One more unit of work
    pub fn register(&self) {
        self.state.send_modify(|s| s.pending += 1);
    }

    /// One unit of work finished
    pub fn complete(&self) {
        self.state.send_modify(|s| s.pending = s.pending.saturating_sub(1));
    }

    /// Record an unrecoverable failure; the first one wins
    pub fn fail(&self, error: Error) {
        self.state.send_modify(|s| {
            if s.failure.is_none() {
                s.failure = Some(Arc::new(error));
            }
        });
    }

    pub fn pending(&self) -> usize {
        self.state.borrow().pending
    }

    pub fn failure(&self) -> Option<Arc<Error>> {
        self.state.borrow().failure.clone()
    }

    /// Resolve when nothing is pending, or with the first failure
    pub fn wait(&self) -> impl Future<Output = std::result::Result<(), Arc<Error>>> + Send + 'static {
        let mut rx = self.state.subscribe();
        async move {
            let failure = rx
                .wait_for(|s| s.pending == 0 || s.failure.is_some())
                .await
                .map(|state| state.failure.clone())
                .unwrap_or_else(|_| Some(Arc::new(Error::Internal("barrier dropped".into()))));
            match failure {
                Some(e) => Err(e),
                None => Ok(()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, assert_ready_err, task};

    #[test]
    fn test_resolves_when_work_drains() {
        let barrier = CompletionBarrier::new();
        barrier.register();
        barrier.register();

        let mut wait = task::spawn(barrier.wait());
        assert_pending!(wait.poll());

        barrier.complete();
        assert_pending!(wait.poll());

        barrier.complete();
        assert!(wait.is_woken());
        assert_ready!(wait.poll()).unwrap();
    }

    #[test]
    fn test_empty_barrier_is_ready() {
        let barrier = CompletionBarrier::new();
        let mut wait = task::spawn(barrier.wait());
        assert_ready!(wait.poll()).unwrap();
    }

    #[test]
    fn test_failure_resolves_early() {
        let barrier = CompletionBarrier::new();
        barrier.register();
        let mut wait = task::spawn(barrier.wait());
        assert_pending!(wait.poll());

        barrier.fail(Error::RetriesExhausted {
            task_id: 3,
            attempts: 3,
        });
        barrier.fail(Error::Internal("second".into()));
        let err = assert_ready_err!(wait.poll());
        assert!(matches!(*err, Error::RetriesExhausted { task_id: 3, .. }));
        assert_eq!(barrier.pending(), 1);
    }

    #[test]
    fn test_dropping_wait_is_harmless() {
        let barrier = CompletionBarrier::new();
        barrier.register();
        {
            let mut wait = task::spawn(barrier.wait());
            assert_pending!(wait.poll());
        }
        barrier.complete();
        assert_eq!(barrier.pending(), 0);
        assert!(barrier.failure().is_none());
    }
}
