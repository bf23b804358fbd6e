//! # swkit Common
//!
//! Utilities shared by the offline cache controller crates.
//!
//! ## Features
//!
//! - Logging configuration and setup (`tracing-subscriber`)
//! - Retry with exponential backoff
//! - Deadline helper for single async operations

use std::time::Duration;
use thiserror::Error;

pub mod logging;
pub mod retry;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::{retry_with_backoff, with_timeout, RetryConfig};

/// An operation did not finish before its deadline.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Operation timed out after {0:?}")]
pub struct TimedOut(pub Duration);

impl TimedOut {
    /// The deadline that was exceeded.
    pub fn deadline(&self) -> Duration {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timed_out_display() {
        let err = TimedOut(Duration::from_millis(250));
        assert_eq!(err.to_string(), "Operation timed out after 250ms");
        assert_eq!(err.deadline(), Duration::from_millis(250));
    }
}
