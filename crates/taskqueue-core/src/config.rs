//! Pool configuration.
//!
//! Every field is a plain scalar. The only validation applied is positivity
//! (and a probability range for the simulated failure rate); there are no
//! cross-field rules.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{Error, Result};

/// Configuration for a worker pool run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of concurrent workers.
    pub worker_count: usize,
    /// Capacity of each bounded queue (jobs, retries, results).
    pub queue_capacity: usize,
    /// `max_retries` stamped on new jobs.
    pub default_max_retries: u32,
    /// `backoff_base` stamped on new jobs.
    pub backoff_base: Duration,
    /// Overall run deadline.
    pub deadline: Duration,
    /// Probability that a simulated attempt fails.
    pub failure_probability: f64,
    /// Upper bound of simulated processing latency.
    pub max_latency: Duration,
    /// Broadcast capacity of the pool event stream.
    pub event_capacity: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            worker_count: defaults::WORKER_COUNT,
            queue_capacity: defaults::QUEUE_CAPACITY,
            default_max_retries: defaults::JOB_MAX_RETRIES,
            backoff_base: Duration::from_millis(defaults::BACKOFF_BASE_MS),
            deadline: Duration::from_secs(defaults::DEADLINE_SECS),
            failure_probability: defaults::FAILURE_PROBABILITY,
            max_latency: Duration::from_millis(defaults::MAX_LATENCY_MS),
            event_capacity: defaults::EVENT_BUS_CAPACITY,
        }
    }
}

impl PoolConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `TASKQUEUE_WORKERS` | `3` | Number of concurrent workers |
    /// | `TASKQUEUE_QUEUE_CAPACITY` | `20` | Bounded queue capacity |
    /// | `TASKQUEUE_MAX_RETRIES` | `3` | Default retry budget per job |
    /// | `TASKQUEUE_BACKOFF_MS` | `1000` | Backoff base in milliseconds |
    /// | `TASKQUEUE_DEADLINE_SECS` | `15` | Overall run deadline |
    /// | `TASKQUEUE_FAILURE_PROBABILITY` | `0.70` | Simulated failure rate |
    /// | `TASKQUEUE_MAX_LATENCY_MS` | `1500` | Simulated latency upper bound |
    /// | `TASKQUEUE_EVENT_CAPACITY` | `256` | Event broadcast capacity |
    ///
    /// Unparseable values fall back to the default; call
    /// [`validate`](Self::validate) before use.
    pub fn from_env() -> Self {
        let base = Self::default();

        Self {
            worker_count: env_parse("TASKQUEUE_WORKERS").unwrap_or(base.worker_count),
            queue_capacity: env_parse("TASKQUEUE_QUEUE_CAPACITY").unwrap_or(base.queue_capacity),
            default_max_retries: env_parse("TASKQUEUE_MAX_RETRIES")
                .unwrap_or(base.default_max_retries),
            backoff_base: env_parse("TASKQUEUE_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(base.backoff_base),
            deadline: env_parse("TASKQUEUE_DEADLINE_SECS")
                .map(Duration::from_secs)
                .unwrap_or(base.deadline),
            failure_probability: env_parse("TASKQUEUE_FAILURE_PROBABILITY")
                .unwrap_or(base.failure_probability),
            max_latency: env_parse("TASKQUEUE_MAX_LATENCY_MS")
                .map(Duration::from_millis)
                .unwrap_or(base.max_latency),
            event_capacity: env_parse("TASKQUEUE_EVENT_CAPACITY").unwrap_or(base.event_capacity),
        }
    }

    /// Check that every scalar is in range.
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::Config("worker_count must be positive".into()));
        }
        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be positive".into()));
        }
        if self.backoff_base.is_zero() {
            return Err(Error::Config("backoff_base must be positive".into()));
        }
        if self.deadline.is_zero() {
            return Err(Error::Config("deadline must be positive".into()));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.failure_probability) {
            return Err(Error::Config(format!(
                "failure_probability must be within [0, 1], got {}",
                self.failure_probability
            )));
        }
        Ok(())
    }

    /// Set the number of workers.
    pub fn with_workers(mut self, count: usize) -> Self {
        self.worker_count = count;
        self
    }

    /// Set the queue capacity.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the default retry budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries;
        self
    }

    /// Set the backoff base.
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Set the run deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Set the simulated failure probability.
    pub fn with_failure_probability(mut self, probability: f64) -> Self {
        self.failure_probability = probability;
        self
    }

    /// Set the simulated latency upper bound.
    pub fn with_max_latency(mut self, latency: Duration) -> Self {
        self.max_latency = latency;
        self
    }

    /// Set the event broadcast capacity.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok())
}
