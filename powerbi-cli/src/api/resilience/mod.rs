//! Retry and concurrency controls for export requests

pub mod concurrency;
pub mod config;
pub mod retry;

pub use concurrency::ConcurrencyLimiter;
pub use config::{ConcurrencyConfig, ResilienceConfig};
pub use retry::{RetryConfig, RetryPolicy, RetryableError};
