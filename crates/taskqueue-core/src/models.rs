//! Data model: jobs, per-job results and the aggregated tally.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PoolConfig;
use crate::defaults;

// =============================================================================
// JOB
// =============================================================================

/// One unit of work plus its retry bookkeeping.
///
/// A job is owned by exactly one in-flight attempt at a time: it moves from
/// the queue into a worker, and from a worker either into a [`JobResult`] or
/// into the retry coordinator. It is never shared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// Unique within a run, never reused.
    pub id: u64,
    /// Opaque workload value.
    pub payload: i64,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Retries allowed before the job is permanently failed.
    pub max_retries: u32,
    /// Base delay unit for exponential backoff.
    pub backoff_base: Duration,
    pub created_at: DateTime<Utc>,
}

impl Job {
    /// Create a fresh job with `retry_count = 0`.
    pub fn new(id: u64, payload: i64, max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            id,
            payload,
            retry_count: 0,
            max_retries,
            backoff_base,
            created_at: Utc::now(),
        }
    }

    /// Record one failed attempt.
    ///
    /// Returns `true` when the job may still be retried, `false` once the
    /// retry budget is exhausted (`retry_count == max_retries + 1`). The
    /// count saturates at `u32::MAX`, so an unbounded budget never wraps.
    pub fn record_failure(&mut self) -> bool {
        self.retry_count = self.retry_count.saturating_add(1);
        self.can_retry()
    }

    /// Whether the job still has retry budget left.
    pub fn can_retry(&self) -> bool {
        self.retry_count <= self.max_retries
    }

    /// Delay to wait before re-enqueueing this job.
    pub fn backoff_delay(&self) -> Duration {
        backoff_delay(self.backoff_base, self.retry_count)
    }
}

/// Pure exponential backoff: `base * 2^retry_count`, no jitter.
///
/// Saturates at `Duration::MAX` instead of overflowing.
pub fn backoff_delay(base: Duration, retry_count: u32) -> Duration {
    let exponent = retry_count.min(defaults::BACKOFF_MAX_EXPONENT);
    base.saturating_mul(1u32 << exponent)
}

/// Assigns run-unique job ids and stamps retry defaults.
#[derive(Debug)]
pub struct JobFactory {
    next_id: AtomicU64,
    max_retries: u32,
    backoff_base: Duration,
}

impl JobFactory {
    /// Create a factory; ids start at 1.
    pub fn new(max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            max_retries,
            backoff_base,
        }
    }

    /// Create a factory using the config's retry defaults.
    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.default_max_retries, config.backoff_base)
    }

    /// Build the next job.
    pub fn create(&self, payload: i64) -> Job {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Job::new(id, payload, self.max_retries, self.backoff_base)
    }
}

impl Default for JobFactory {
    fn default() -> Self {
        Self::new(
            defaults::JOB_MAX_RETRIES,
            Duration::from_millis(defaults::BACKOFF_BASE_MS),
        )
    }
}

// =============================================================================
// RESULT
// =============================================================================

/// Terminal state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    /// Retries exhausted.
    Failed,
}

/// Terminal outcome for a job, emitted exactly once per job lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: u64,
    pub worker_id: usize,
    /// Present only when `status` is [`JobStatus::Success`].
    pub output: Option<i64>,
    /// Wall-clock time of the attempt that produced this result.
    pub duration: Duration,
    pub status: JobStatus,
    /// The job's `retry_count` when it reached its terminal state.
    pub retry_count: u32,
}

impl JobResult {
    /// Result for a successful attempt.
    pub fn success(job: &Job, worker_id: usize, output: i64, duration: Duration) -> Self {
        Self {
            job_id: job.id,
            worker_id,
            output: Some(output),
            duration,
            status: JobStatus::Success,
            retry_count: job.retry_count,
        }
    }

    /// Result for a job whose retry budget is exhausted.
    pub fn failed(job: &Job, worker_id: usize, duration: Duration) -> Self {
        Self {
            job_id: job.id,
            worker_id,
            output: None,
            duration,
            status: JobStatus::Failed,
            retry_count: job.retry_count,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }
}

// =============================================================================
// TALLY
// =============================================================================

/// Success/failure counters kept by the result collector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub success: usize,
    pub failed: usize,
}

impl Tally {
    pub fn new(success: usize, failed: usize) -> Self {
        Self { success, failed }
    }

    /// Count one result.
    pub fn record(&mut self, result: &JobResult) {
        if result.is_success() {
            self.success += 1;
        } else {
            self.failed += 1;
        }
    }

    /// Number of jobs that reached a terminal state.
    pub fn total(&self) -> usize {
        self.success + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(max_retries: u32) -> Job {
        Job::new(7, 21, max_retries, Duration::from_millis(100))
    }

    #[test]
    fn test_job_new_starts_with_zero_retries() {
        let job = job(3);
        assert_eq!(job.id, 7);
        assert_eq!(job.payload, 21);
        assert_eq!(job.retry_count, 0);
        assert!(job.can_retry());
    }

    #[test]
    fn test_record_failure_exhausts_budget() {
        let mut job = job(2);
        assert!(job.record_failure());
        assert!(job.record_failure());
        assert!(!job.record_failure());
        assert_eq!(job.retry_count, 3);
    }

    #[test]
    fn test_record_failure_zero_retries() {
        let mut job = job(0);
        assert!(!job.record_failure());
        assert_eq!(job.retry_count, 1);
    }

    #[test]
    fn test_record_failure_saturates_with_unbounded_budget() {
        let mut job = job(u32::MAX);
        job.retry_count = u32::MAX - 1;
        assert!(job.record_failure());
        assert_eq!(job.retry_count, u32::MAX);
        assert!(job.record_failure());
        assert_eq!(job.retry_count, u32::MAX);
        assert_eq!(
            job.backoff_delay(),
            backoff_delay(job.backoff_base, defaults::BACKOFF_MAX_EXPONENT)
        );
    }

    #[test]
    fn test_backoff_progression() {
        let base = Duration::from_millis(100);
        assert_eq!(backoff_delay(base, 0), Duration::from_millis(100));
        assert_eq!(backoff_delay(base, 1), Duration::from_millis(200));
        assert_eq!(backoff_delay(base, 2), Duration::from_millis(400));
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_monotonic() {
        let base = Duration::from_millis(3);
        let delays: Vec<_> = (0..20).map(|n| backoff_delay(base, n)).collect();
        assert!(delays.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_backoff_saturates() {
        let base = Duration::from_secs(u64::MAX / 2);
        assert_eq!(backoff_delay(base, 10), Duration::MAX);
        assert_eq!(
            backoff_delay(Duration::from_nanos(1), 1_000),
            backoff_delay(Duration::from_nanos(1), defaults::BACKOFF_MAX_EXPONENT)
        );
    }

    #[test]
    fn test_job_backoff_delay_uses_retry_count() {
        let mut job = job(3);
        job.record_failure();
        assert_eq!(job.backoff_delay(), Duration::from_millis(200));
    }

    #[test]
    fn test_factory_assigns_unique_ids() {
        let factory = JobFactory::new(5, Duration::from_millis(10));
        let a = factory.create(1);
        let b = factory.create(2);
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(a.max_retries, 5);
        assert_eq!(b.backoff_base, Duration::from_millis(10));
    }

    #[test]
    fn test_factory_default_uses_defaults() {
        let job = JobFactory::default().create(0);
        assert_eq!(job.max_retries, defaults::JOB_MAX_RETRIES);
        assert_eq!(
            job.backoff_base,
            Duration::from_millis(defaults::BACKOFF_BASE_MS)
        );
    }

    #[test]
    fn test_result_constructors() {
        let mut job = job(0);
        let ok = JobResult::success(&job, 2, 42, Duration::from_millis(5));
        assert!(ok.is_success());
        assert_eq!(ok.output, Some(42));
        assert_eq!(ok.worker_id, 2);

        job.record_failure();
        let failed = JobResult::failed(&job, 1, Duration::ZERO);
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.output, None);
        assert_eq!(failed.retry_count, 1);
    }

    #[test]
    fn test_tally_record() {
        let mut job = job(0);
        let mut tally = Tally::default();
        tally.record(&JobResult::success(&job, 1, 2, Duration::ZERO));
        job.record_failure();
        tally.record(&JobResult::failed(&job, 1, Duration::ZERO));
        tally.record(&JobResult::failed(&job, 1, Duration::ZERO));
        assert_eq!(tally, Tally::new(1, 2));
        assert_eq!(tally.total(), 3);
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&JobStatus::Failed).unwrap();
        assert_eq!(json, "\"failed\"");
        let status: JobStatus = serde_json::from_str("\"success\"").unwrap();
        assert_eq!(status, JobStatus::Success);
    }
}
