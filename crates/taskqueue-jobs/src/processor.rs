//! Processing seam: what a worker does with one attempt of a job.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use taskqueue_core::{defaults, Job, PoolConfig};

/// Outcome of a single attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// The attempt produced an output.
    Success(i64),
    /// The attempt failed; the job may be retried.
    Failed(String),
}

/// Trait for job processors.
///
/// Implementations must be cancel safe: a worker drops the returned future
/// when the run deadline fires mid-attempt.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Run one attempt of `job`.
    async fn process(&self, job: &Job) -> Attempt;
}

/// The output a successful attempt computes for `payload`.
pub fn compute_output(payload: i64) -> i64 {
    payload.saturating_mul(2)
}

/// Simulated processor with probabilistic failure and variable latency.
///
/// A failing attempt returns immediately. A succeeding attempt sleeps for a
/// uniformly random latency in `[0, max_latency)` and returns
/// `payload * 2`.
pub struct SimulatedProcessor {
    failure_probability: f64,
    max_latency: Duration,
    rng: Mutex<StdRng>,
}

impl SimulatedProcessor {
    /// Create a processor seeded from OS entropy.
    pub fn new(failure_probability: f64, max_latency: Duration) -> Self {
        Self::with_rng(failure_probability, max_latency, StdRng::from_entropy())
    }

    /// Create a reproducible processor.
    pub fn seeded(failure_probability: f64, max_latency: Duration, seed: u64) -> Self {
        Self::with_rng(failure_probability, max_latency, StdRng::seed_from_u64(seed))
    }

    /// Create a processor from the pool configuration.
    pub fn from_config(config: &PoolConfig) -> Self {
        Self::new(config.failure_probability, config.max_latency)
    }

    fn with_rng(failure_probability: f64, max_latency: Duration, rng: StdRng) -> Self {
        Self {
            failure_probability: failure_probability.clamp(0.0, 1.0),
            max_latency,
            rng: Mutex::new(rng),
        }
    }

    /// Draw the fate of the next attempt: `None` for failure, otherwise the
    /// latency to simulate.
    fn draw(&self) -> Option<Duration> {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if rng.gen::<f64>() < self.failure_probability {
            return None;
        }
        let max_ms = self.max_latency.as_millis() as u64;
        let latency_ms = if max_ms == 0 { 0 } else { rng.gen_range(0..max_ms) };
        Some(Duration::from_millis(latency_ms))
    }
}

impl Default for SimulatedProcessor {
    fn default() -> Self {
        Self::new(
            defaults::FAILURE_PROBABILITY,
            Duration::from_millis(defaults::MAX_LATENCY_MS),
        )
    }
}

#[async_trait]
impl Processor for SimulatedProcessor {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn process(&self, job: &Job) -> Attempt {
        match self.draw() {
            None => Attempt::Failed(format!(
                "simulated failure on attempt {}",
                job.retry_count + 1
            )),
            Some(latency) => {
                if !latency.is_zero() {
                    tokio::time::sleep(latency).await;
                }
                Attempt::Success(compute_output(job.payload))
            }
        }
    }
}

/// Deterministic processor for tests and dry runs.
///
/// Fails every attempt of a job while its `retry_count` is below
/// `failures`, then succeeds with `payload * 2` after `latency`.
pub struct FixedProcessor {
    failures: u32,
    latency: Duration,
    calls: AtomicUsize,
}

impl FixedProcessor {
    /// Fail the first `failures` attempts of every job.
    pub fn failing_first(failures: u32) -> Self {
        Self {
            failures,
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    /// Every attempt fails.
    pub fn failing() -> Self {
        Self::failing_first(u32::MAX)
    }

    /// Every attempt succeeds.
    pub fn succeeding() -> Self {
        Self::failing_first(0)
    }

    /// Sleep for `latency` before each attempt resolves.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of attempts started so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Processor for FixedProcessor {
    fn name(&self) -> &'static str {
        "fixed"
    }

    async fn process(&self, job: &Job) -> Attempt {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if job.retry_count < self.failures {
            Attempt::Failed(format!("scripted failure {}", job.retry_count + 1))
        } else {
            Attempt::Success(compute_output(job.payload))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(payload: i64) -> Job {
        Job::new(1, payload, 3, Duration::from_millis(10))
    }

    #[test]
    fn test_compute_output_doubles() {
        assert_eq!(compute_output(21), 42);
        assert_eq!(compute_output(-3), -6);
        assert_eq!(compute_output(i64::MAX), i64::MAX);
    }

    #[tokio::test]
    async fn test_always_fails() {
        let processor = SimulatedProcessor::seeded(1.0, Duration::ZERO, 7);
        for _ in 0..50 {
            assert!(matches!(
                processor.process(&job(5)).await,
                Attempt::Failed(_)
            ));
        }
    }

    #[tokio::test]
    async fn test_never_fails() {
        let processor = SimulatedProcessor::seeded(0.0, Duration::ZERO, 7);
        for _ in 0..50 {
            assert_eq!(processor.process(&job(5)).await, Attempt::Success(10));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_bounded() {
        let processor = SimulatedProcessor::seeded(0.0, Duration::from_millis(100), 11);
        for _ in 0..20 {
            let start = tokio::time::Instant::now();
            processor.process(&job(1)).await;
            assert!(start.elapsed() < Duration::from_millis(100));
        }
    }

    #[test]
    fn test_seeded_is_reproducible() {
        let a = SimulatedProcessor::seeded(0.5, Duration::from_millis(50), 99);
        let b = SimulatedProcessor::seeded(0.5, Duration::from_millis(50), 99);
        let draws_a: Vec<_> = (0..32).map(|_| a.draw()).collect();
        let draws_b: Vec<_> = (0..32).map(|_| b.draw()).collect();
        assert_eq!(draws_a, draws_b);
    }

    #[test]
    fn test_probability_clamped() {
        let processor = SimulatedProcessor::new(3.0, Duration::ZERO);
        assert_eq!(processor.failure_probability, 1.0);
        assert!((0..16).all(|_| processor.draw().is_none()));
        assert_eq!(processor.name(), "simulated");
    }

    #[tokio::test]
    async fn test_fixed_processor_fails_first_attempts() {
        let processor = FixedProcessor::failing_first(2);
        let mut job = job(4);
        assert!(matches!(processor.process(&job).await, Attempt::Failed(_)));
        job.retry_count = 1;
        assert!(matches!(processor.process(&job).await, Attempt::Failed(_)));
        job.retry_count = 2;
        assert_eq!(processor.process(&job).await, Attempt::Success(8));
        assert_eq!(processor.calls(), 3);
    }

    #[tokio::test]
    async fn test_fixed_processor_extremes() {
        let mut job = job(1);
        job.retry_count = 1_000;
        assert!(matches!(
            FixedProcessor::failing().process(&job).await,
            Attempt::Failed(_)
        ));
        assert_eq!(
            FixedProcessor::succeeding().process(&job).await,
            Attempt::Success(2)
        );
    }

    #[test]
    fn test_failure_message_names_attempt() {
        let processor = SimulatedProcessor::seeded(1.0, Duration::ZERO, 1);
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let mut job = job(1);
        job.retry_count = 2;
        match rt.block_on(processor.process(&job)) {
            Attempt::Failed(msg) => assert!(msg.contains("attempt 3")),
            other => panic!("unexpected attempt: {other:?}"),
        }
    }
}
