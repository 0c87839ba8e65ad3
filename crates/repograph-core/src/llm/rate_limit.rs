//! Bounded-concurrency rate limiting and retry for collaborator calls
//!
//! Every outbound call (LLM extraction, summaries, embeddings) goes through a
//! [`RateLimiter`]: a semaphore caps simultaneous calls, a shared timestamp
//! enforces a minimum interval between call starts, and transient failures
//! are retried with a wait before the item is given up.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{Config, RateLimitConfig};

use super::error::CollaboratorError;

/// Retry timing for transient collaborator failures
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Wait applied after a rate-limit response
    pub error_wait: Duration,
    /// Base delay for exponential backoff on other transient errors
    pub backoff_base_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RateLimitConfig::default())
    }
}

impl From<&RateLimitConfig> for RetryPolicy {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            error_wait: Duration::from_secs_f64(config.error_wait_secs.max(0.0)),
            backoff_base_ms: config.backoff_base_ms,
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `err` on attempt number `attempt` (1-based)
    pub fn wait_for(&self, err: &CollaboratorError, attempt: u32) -> Duration {
        match err {
            CollaboratorError::Transient {
                retry_after: hint, ..
            } if err.is_rate_limited() => {
                let hinted = hint.map(Duration::from_secs).unwrap_or_default();
                self.error_wait.max(hinted)
            }
            _ => Duration::from_millis(calculate_backoff(self.backoff_base_ms, attempt)),
        }
    }
}

/// Limits concurrency and pacing of outbound calls
#[derive(Debug)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
    policy: RetryPolicy,
}

impl RateLimiter {
    pub fn new(max_concurrent: usize, min_interval: Duration, policy: RetryPolicy) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            min_interval,
            last_call: Mutex::new(None),
            policy,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.pipeline.parallel_num,
            Duration::from_secs_f64(config.rate_limit.min_interval_secs.max(0.0)),
            RetryPolicy::from(&config.rate_limit),
        )
    }

    /// Limiter without pacing, used where collaborators are local
    pub fn unpaced(max_concurrent: usize) -> Self {
        Self::new(max_concurrent, Duration::ZERO, RetryPolicy::default())
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn acquire(&self) -> Result<SemaphorePermit<'_>, CollaboratorError> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| CollaboratorError::permanent("rate limiter closed"))?;

        let mut last = self.last_call.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.min_interval {
                tokio::time::sleep(self.min_interval - elapsed).await;
            }
        }
        *last = Some(Instant::now());

        Ok(permit)
    }

    /// Run `op` under the limiter, retrying transient failures
    pub async fn with_retry<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, CollaboratorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>>,
    {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let result = {
                let _permit = self.acquire().await?;
                op().await
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(label, attempt, "Collaborator call succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) if err.is_transient() && attempt <= self.policy.max_retries => {
                    let wait = self.policy.wait_for(&err, attempt);
                    warn!(
                        label,
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "Transient collaborator failure, retrying"
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// Calculate exponential backoff delay in milliseconds
pub fn calculate_backoff(base_ms: u64, attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1).min(16);
    let delay = base_ms.saturating_mul(2u64.pow(exponent));

    // Add some jitter (10% random variation)
    let jitter = delay / 10;
    delay + (rand_jitter() % jitter.max(1))
}

/// Generate a pseudo-random jitter value
fn rand_jitter() -> u64 {
    use std::time::SystemTime;
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64 % 1000)
        .unwrap_or(0)
}
