//! Network utilities: JSON HTTP client and retry policy.

mod client;
mod retry;

pub use client::{extract_domain, ApiLog, ApiLogEntry, HttpClient};
pub use retry::{retry_async, RetryConfig, RetryDecision, RetryStats};
