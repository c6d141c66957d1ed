//! Retry utilities with exponential backoff and jitter.
//!
//! Two shapes of retry live here:
//!
//! - [`retry_with_backoff_if`] retries an async operation in place, used by the
//!   configuration synchronizer's compare-and-swap loop.
//! - [`RequeueBackoff`] tracks consecutive failures per object so the
//!   reconciler can hand the controller a growing requeue delay.
//!
//! # Example
//!
//! ```ignore
//! use tyk_route_operator::retry::{retry_with_backoff_if, RetryConfig};
//!
//! let result = retry_with_backoff_if(
//!     &RetryConfig::with_max_attempts(5),
//!     "sync_document",
//!     || async { store.replace(&doc_ref, &document).await },
//!     |e: &Error| e.is_conflict(),
//! ).await;
//! ```

use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tracing::{error, warn};

/// Configuration for operations that may fail transiently.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0, // infinite
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Un-jittered delay before retry number `attempt` (1-based), capped at `max_delay`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }
}

/// Scale a delay by a random factor in 0.5x..1.5x
fn jittered(delay: Duration) -> Duration {
    let jitter = rand::thread_rng().gen_range(0.5..1.5);
    Duration::from_secs_f64(delay.as_secs_f64() * jitter)
}

/// Execute an async operation with exponential backoff and jitter.
///
/// Only errors accepted by `should_retry` are retried, up to `max_attempts`
/// (0 = unbounded). Any other error is returned immediately.
///
/// On exhaustion the last error is returned unchanged; callers that need a
/// distinct "gave up" error map it themselves.
pub async fn retry_with_backoff_if<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if !should_retry(&e) => return Err(e),
            Err(e) => {
                if config.max_attempts > 0 && attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Operation failed after max retries"
                    );
                    return Err(e);
                }

                let jittered_delay = jittered(delay);

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = jittered_delay.as_millis(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(jittered_delay).await;

                // Exponential backoff, capped at max_delay
                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
        }
    }
}

/// Per-object requeue backoff.
///
/// Each failure for a key bumps its attempt counter and yields the next
/// jittered delay; a success clears the counter.
#[derive(Debug)]
pub struct RequeueBackoff {
    config: RetryConfig,
    attempts: DashMap<String, u32>,
}

impl RequeueBackoff {
    /// Create a tracker using `config` for delay growth
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts: DashMap::new(),
        }
    }

    /// Record a failure for `key` and return how long to wait before retrying
    pub fn next_delay(&self, key: &str) -> Duration {
        let attempt = {
            let mut entry = self.attempts.entry(key.to_string()).or_insert(0);
            *entry = entry.saturating_add(1);
            *entry
        };
        jittered(self.config.delay_for_attempt(attempt))
    }

    /// Forget failures recorded for `key`
    pub fn reset(&self, key: &str) {
        self.attempts.remove(key);
    }

    /// Number of consecutive failures recorded for `key`
    pub fn attempts(&self, key: &str) -> u32 {
        self.attempts.get(key).map(|a| *a).unwrap_or(0)
    }
}
