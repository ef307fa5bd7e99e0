//! Centralized default constants for taskqueue.
//!
//! **This module is the single source of truth** for shared default values.
//! The pool configuration, the job factory and the demo driver all read
//! from here instead of defining their own magic numbers.

// =============================================================================
// WORKER POOL
// =============================================================================

/// Default number of concurrent workers.
pub const WORKER_COUNT: usize = 3;

/// Default capacity of the job, retry and result queues.
pub const QUEUE_CAPACITY: usize = 20;

/// Default broadcast capacity for pool events.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// RETRY
// =============================================================================

/// Default maximum retry count for failed jobs.
pub const JOB_MAX_RETRIES: u32 = 3;

/// Default backoff base in milliseconds. The n-th retry waits `base * 2^n`.
pub const BACKOFF_BASE_MS: u64 = 1_000;

/// Largest exponent applied to the backoff base. Beyond this the delay
/// saturates rather than overflowing.
pub const BACKOFF_MAX_EXPONENT: u32 = 31;

// =============================================================================
// DEADLINE
// =============================================================================

/// Default overall run deadline in seconds.
pub const DEADLINE_SECS: u64 = 15;

// =============================================================================
// SIMULATED PROCESSING
// =============================================================================

/// Probability that a simulated attempt fails.
pub const FAILURE_PROBABILITY: f64 = 0.70;

/// Upper bound (exclusive) of simulated processing latency in milliseconds.
pub const MAX_LATENCY_MS: u64 = 1_500;

// =============================================================================
// DEMO DRIVER
// =============================================================================

/// Number of jobs the demo driver submits.
pub const DEMO_JOB_COUNT: usize = 20;

/// Upper bound (exclusive) of demo job payloads.
pub const DEMO_PAYLOAD_MAX: i64 = 100;
