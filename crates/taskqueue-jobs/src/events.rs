//! Pool events and counters.
//!
//! Events are broadcast best-effort: a send with no subscribers, or to a
//! lagging subscriber, never affects the pipeline. Counters are lock-free and
//! always accurate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Why a worker returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The job queue was closed and drained.
    QueueClosed,
    /// The run deadline fired.
    Deadline,
}

/// Event emitted by pool components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// A worker started pulling jobs.
    WorkerStarted { worker_id: usize },
    /// A worker returned.
    WorkerStopped { worker_id: usize, reason: StopReason },
    /// An attempt failed; `attempt` is 1-based.
    AttemptFailed {
        job_id: u64,
        worker_id: usize,
        attempt: u32,
    },
    /// The retry coordinator scheduled a delayed re-enqueue.
    RetryScheduled {
        job_id: u64,
        retry_count: u32,
        delay: Duration,
    },
    /// A delayed job was pushed back onto the job queue.
    JobRequeued { job_id: u64, retry_count: u32 },
    /// A pending retry was dropped because the run ended first.
    RetryDropped { job_id: u64, retry_count: u32 },
    /// A job reached the success state.
    JobCompleted {
        job_id: u64,
        worker_id: usize,
        output: i64,
    },
    /// A job exhausted its retries.
    JobFailed {
        job_id: u64,
        worker_id: usize,
        retry_count: u32,
    },
    /// A worker dropped a job mid-attempt because the deadline fired.
    JobAbandoned { job_id: u64, worker_id: usize },
}

/// Lock-free pipeline counters.
#[derive(Debug, Default)]
pub struct PoolStats {
    submitted: AtomicU64,
    attempts: AtomicU64,
    retries_scheduled: AtomicU64,
    requeued: AtomicU64,
    retries_dropped: AtomicU64,
    abandoned: AtomicU64,
    protocol_violations: AtomicU64,
}

impl PoolStats {
    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry_scheduled(&self) {
        self.retries_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_requeued(&self) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry_dropped(&self) {
        self.retries_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_abandoned(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    /// A send hit a closed queue while the run was still live.
    pub fn record_protocol_violation(&self) {
        self.protocol_violations.fetch_add(1, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            retries_dropped: self.retries_dropped.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            protocol_violations: self.protocol_violations.load(Ordering::SeqCst),
        }
    }
}

/// Point-in-time copy of [`PoolStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub submitted: u64,
    pub attempts: u64,
    pub retries_scheduled: u64,
    pub requeued: u64,
    pub retries_dropped: u64,
    pub abandoned: u64,
    pub protocol_violations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_snapshot() {
        let stats = PoolStats::default();
        stats.record_submitted();
        stats.record_submitted();
        stats.record_attempt();
        stats.record_retry_scheduled();
        stats.record_requeued();
        stats.record_retry_dropped();
        stats.record_abandoned();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.submitted, 2);
        assert_eq!(snapshot.attempts, 1);
        assert_eq!(snapshot.retries_scheduled, 1);
        assert_eq!(snapshot.requeued, 1);
        assert_eq!(snapshot.retries_dropped, 1);
        assert_eq!(snapshot.abandoned, 1);
        assert_eq!(snapshot.protocol_violations, 0);
    }

    #[test]
    fn test_snapshot_serialization() {
        let stats = PoolStats::default();
        stats.record_protocol_violation();
        let json = serde_json::to_string(&stats.snapshot()).unwrap();
        assert!(json.contains("\"protocol_violations\":1"));
    }

    #[test]
    fn test_stop_reason_serialization() {
        let json = serde_json::to_string(&StopReason::QueueClosed).unwrap();
        assert_eq!(json, "\"queue_closed\"");
    }

    #[test]
    fn test_event_debug() {
        let event = PoolEvent::RetryScheduled {
            job_id: 3,
            retry_count: 2,
            delay: Duration::from_millis(400),
        };
        let debug_str = format!("{:?}", event);
        assert!(debug_str.contains("RetryScheduled"));
        assert!(debug_str.contains("400ms"));
    }
}
