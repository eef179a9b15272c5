//! Wrappers for capability calls that can fail transiently or must be paced.

pub mod rate_limit;
pub mod retry;

pub use rate_limit::RateLimiter;
pub use retry::{RetryExecutor, RetryPolicy};
