//! Retry logic with exponential backoff.
//!
//! Two kinds of waits are distinguished:
//! - transient failures back off exponentially and consume the attempt budget;
//! - rate-limit responses wait for the server-declared interval and are retried
//!   without consuming the budget.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::NetworkConfig;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first one).
    pub max_attempts: u32,
    /// Initial delay between retries.
    pub base_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Exponential base (typically 2.0 for doubling).
    pub exponential_base: f64,
    /// Whether to add random jitter to delays. Off by default, which keeps
    /// the default schedule at exactly 1s, 2s, 4s.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: NetworkConfig::MAX_ATTEMPTS,
            base_delay: NetworkConfig::RETRY_BASE_DELAY,
            max_delay: NetworkConfig::RETRY_MAX_DELAY,
            exponential_base: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let multiplier = self.exponential_base.powi(attempt as i32);
        let delay_secs = self.base_delay.as_secs_f64() * multiplier;
        let capped_secs = delay_secs.min(self.max_delay.as_secs_f64());

        let final_secs = if self.jitter {
            let jitter_factor = rand::rng().random_range(0.5..1.5);
            (capped_secs * jitter_factor).min(self.max_delay.as_secs_f64())
        } else {
            capped_secs
        };

        Duration::from_secs_f64(final_secs)
    }
}

/// What the retry loop should do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Transient failure: back off and consume one attempt.
    Retry,
    /// Server asked us to wait; does not consume an attempt.
    RetryAfter(Duration),
    /// Permanent failure: surface immediately.
    Stop,
}

/// Statistics about a retry operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    /// Number of attempts made, rate-limited ones included.
    pub attempts: u32,
    /// Number of attempts answered with a rate-limit wait.
    pub rate_limited: u32,
    /// Total delay accumulated.
    pub total_delay: Duration,
    pub success: bool,
    pub last_error: Option<String>,
}

/// Retry an async operation with exponential backoff.
///
/// `classify` decides per error whether to back off, honour a server wait or
/// stop. Returns the final result together with the attempt statistics.
pub async fn retry_async<F, Fut, T, E>(
    config: &RetryConfig,
    mut operation: F,
    classify: impl Fn(&E) -> RetryDecision,
) -> (Result<T, E>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut stats = RetryStats::default();
    let mut failures: u32 = 0;

    loop {
        stats.attempts += 1;

        let err = match operation().await {
            Ok(value) => {
                stats.success = true;
                if stats.attempts > 1 {
                    debug!("Operation succeeded after {} attempts", stats.attempts);
                }
                return (Ok(value), stats);
            }
            Err(e) => e,
        };
        stats.last_error = Some(err.to_string());

        let delay = match classify(&err) {
            RetryDecision::Stop => {
                debug!("Error is not retryable: {}", err);
                return (Err(err), stats);
            }
            RetryDecision::RetryAfter(wait) => {
                stats.rate_limited += 1;
                warn!("Rate limited, waiting {:?} before retrying", wait);
                wait
            }
            RetryDecision::Retry => {
                if failures + 1 >= config.max_attempts {
                    warn!(
                        "All {} attempts exhausted. Last error: {}",
                        config.max_attempts, err
                    );
                    return (Err(err), stats);
                }
                let delay = config.calculate_delay(failures);
                failures += 1;
                warn!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}",
                    failures, config.max_attempts, err, delay
                );
                delay
            }
        };

        stats.total_delay += delay;
        tokio::time::sleep(delay).await;
    }
}
