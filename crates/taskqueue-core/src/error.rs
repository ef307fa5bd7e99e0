//! Error types for taskqueue.
//!
//! Job failures are not errors: a transient failure is retried and a
//! permanent one becomes a `failed` [`JobResult`](crate::JobResult). The
//! variants below cover misuse of the driver API and broken invariants.

use thiserror::Error;

/// Result type alias using taskqueue's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for taskqueue operations.
#[derive(Error, Debug)]
pub enum Error {
    /// The job queue no longer accepts submissions
    #[error("Queue closed: {0}")]
    QueueClosed(String),

    /// The run deadline fired before the operation could complete
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_queue_closed() {
        let err = Error::QueueClosed("shutdown in progress".to_string());
        assert_eq!(err.to_string(), "Queue closed: shutdown in progress");
    }

    #[test]
    fn test_error_display_deadline_exceeded() {
        let err = Error::DeadlineExceeded("submit".to_string());
        assert_eq!(err.to_string(), "Deadline exceeded: submit");
    }

    #[test]
    fn test_error_display_config() {
        let err = Error::Config("worker_count must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: worker_count must be positive"
        );
    }

    #[test]
    fn test_error_display_internal() {
        let err = Error::Internal("worker task panicked".to_string());
        assert_eq!(err.to_string(), "Internal error: worker task panicked");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
