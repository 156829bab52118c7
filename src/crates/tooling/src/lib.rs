//! Shared utilities for the conductor workspace
//!
//! # Modules
//!
//! - `async_utils` - Retry policies and timeout utilities for async operations
//! - `logging` - Structured logging setup and helpers

pub mod async_utils;
pub mod logging;

pub use async_utils::retry::{is_retryable_error, RetryPolicy};
pub use async_utils::timeout::{with_timeout, TimeoutError};

/// Get version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
