//! # taskqueue-jobs
//!
//! Bounded, fault-tolerant job processing for taskqueue.
//!
//! This crate provides:
//! - A fixed pool of workers draining a shared bounded job queue
//! - A retry coordinator re-enqueueing failed jobs after exponential backoff
//! - A result collector tallying terminal outcomes
//! - Deadline-aware shutdown that closes every queue in producer order
//!
//! ## Example
//!
//! ```ignore
//! use taskqueue_jobs::{Deadline, PoolConfig, WorkerPool};
//!
//! let config = PoolConfig::from_env();
//! let pool = WorkerPool::simulated(config.clone());
//! let mut events = pool.events();
//!
//! let handle = pool.start(Deadline::after(config.deadline))?;
//! for payload in 0..20 {
//!     handle.submit_payload(payload).await?;
//! }
//!
//! let report = handle.shutdown().await?;
//! println!("{} succeeded, {} failed", report.tally.success, report.tally.failed);
//! ```

pub mod collector;
pub mod events;
pub mod ledger;
pub mod pool;
pub mod processor;
pub mod retry;
pub mod worker;

// Re-export core types
pub use taskqueue_core::*;

pub use collector::{CollectorReport, ResultCollector};
pub use events::{PoolEvent, PoolStats, StatsSnapshot, StopReason};
pub use ledger::InFlightLedger;
pub use pool::{start_pool, JobSubmitter, PoolHandle, PoolPhase, PoolReport, WorkerPool};
pub use processor::{compute_output, Attempt, FixedProcessor, Processor, SimulatedProcessor};
pub use retry::RetryCoordinator;
pub use worker::{SharedJobQueue, Worker};
