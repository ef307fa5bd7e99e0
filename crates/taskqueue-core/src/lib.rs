//! # taskqueue-core
//!
//! Core types and abstractions for the taskqueue job-processing pipeline.
//!
//! This crate provides the data model shared by every pipeline component
//! (jobs, results, tallies), the deadline token they all observe, the
//! error type, and the configuration surface consumed by the driver.

pub mod config;
pub mod deadline;
pub mod defaults;
pub mod error;
pub mod models;

// Re-export commonly used types at crate root
pub use config::PoolConfig;
pub use deadline::{Deadline, DeadlineState};
pub use error::{Error, Result};
pub use models::*;
