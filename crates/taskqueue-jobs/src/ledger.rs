//! In-flight ledger: tracks admitted jobs that have not reached a terminal
//! state yet.
//!
//! The job queue is re-fed by the retry coordinator, so "no more
//! submissions" does not mean "no more jobs". The ledger lets the driver
//! close the job queue only once every admitted job has settled, which
//! guarantees no retry task is still waiting to write to it.

use std::sync::Mutex;

use tokio::sync::Notify;
use tracing::debug;

use taskqueue_core::{Deadline, Error, Result};

#[derive(Debug, Default)]
struct LedgerState {
    closed: bool,
    outstanding: usize,
}

/// Counter of outstanding jobs with a one-way "closed" flag.
#[derive(Debug, Default)]
pub struct InFlightLedger {
    state: Mutex<LedgerState>,
    drained: Notify,
}

impl InFlightLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job about to enter the queue.
    ///
    /// Fails once [`close`](Self::close) has been called.
    pub fn admit(&self) -> Result<()> {
        let mut state = self.lock();
        if state.closed {
            return Err(Error::QueueClosed(
                "pool is shutting down, no new jobs accepted".into(),
            ));
        }
        state.outstanding += 1;
        Ok(())
    }

    /// Mark one admitted job as finished: terminal result emitted, or
    /// dropped because the run ended.
    pub fn settle(&self) {
        let mut state = self.lock();
        debug_assert!(state.outstanding > 0, "settle without matching admit");
        state.outstanding = state.outstanding.saturating_sub(1);
        if state.closed && state.outstanding == 0 {
            self.drained.notify_waiters();
        }
    }

    /// Stop admitting jobs. Idempotent.
    pub fn close(&self) {
        let mut state = self.lock();
        if !state.closed {
            state.closed = true;
            debug!(outstanding = state.outstanding, "In-flight ledger closed");
        }
        if state.outstanding == 0 {
            self.drained.notify_waiters();
        }
    }

    pub fn outstanding(&self) -> usize {
        self.lock().outstanding
    }

    fn is_drained(&self) -> bool {
        let state = self.lock();
        state.closed && state.outstanding == 0
    }

    /// Wait until the ledger is closed with nothing outstanding.
    ///
    /// Returns `true` when drained, `false` if the deadline fired first.
    pub async fn wait_drained(&self, deadline: &Deadline) -> bool {
        loop {
            let notified = self.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.is_drained() {
                return true;
            }

            tokio::select! {
                biased;
                _ = deadline.cancelled() => return false,
                _ = &mut notified => {}
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_admit_and_settle() {
        let ledger = InFlightLedger::new();
        ledger.admit().unwrap();
        ledger.admit().unwrap();
        assert_eq!(ledger.outstanding(), 2);
        ledger.settle();
        assert_eq!(ledger.outstanding(), 1);
    }

    #[test]
    fn test_admit_after_close_fails() {
        let ledger = InFlightLedger::new();
        ledger.close();
        let err = ledger.admit().unwrap_err();
        assert!(matches!(err, Error::QueueClosed(_)));
        assert_eq!(ledger.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_wait_drained_empty() {
        let ledger = InFlightLedger::new();
        ledger.close();
        assert!(ledger.wait_drained(&Deadline::never()).await);
    }

    #[tokio::test]
    async fn test_wait_drained_not_closed_blocks() {
        let ledger = InFlightLedger::new();
        let waited = tokio::time::timeout(
            Duration::from_millis(20),
            ledger.wait_drained(&Deadline::never()),
        )
        .await;
        assert!(waited.is_err());
    }

    #[tokio::test]
    async fn test_wait_drained_after_settle() {
        let ledger = Arc::new(InFlightLedger::new());
        ledger.admit().unwrap();
        ledger.close();

        let waiter = {
            let ledger = ledger.clone();
            tokio::spawn(async move { ledger.wait_drained(&Deadline::never()).await })
        };

        tokio::task::yield_now().await;
        ledger.settle();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_drained_deadline_wins() {
        let ledger = InFlightLedger::new();
        ledger.admit().unwrap();
        ledger.close();

        let deadline = Deadline::after(Duration::from_millis(50));
        assert!(!ledger.wait_drained(&deadline).await);
        assert_eq!(ledger.outstanding(), 1);
    }
}
