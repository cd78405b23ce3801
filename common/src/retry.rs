// Retry policies for outbound HTTP calls and local file operations
// HTTP: exponential backoff floored at the base delay, capped at 60s, plus jitter
// I/O: fixed delay between attempts

use crate::errors::FileStoreError;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Upper bound of the computed (not server-provided) backoff
pub const MAX_BACKOFF_SECS: u64 = 60;

/// Jitter is drawn from [0, MAX_JITTER_MS)
pub const MAX_JITTER_MS: u64 = 250;

/// Status codes treated as transient by the transport
pub const TRANSIENT_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Non-standard codes the remote API uses to signal throttling
pub const THROTTLING_STATUS_CODES: [u16; 1] = [599];

/// Retry strategy trait for calculating retry delays
pub trait RetryStrategy: Send + Sync {
    /// Delay before the attempt following `attempt` (zero-based).
    /// Returns None once the attempt budget is spent.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    /// Total attempts allowed, including the first one
    fn max_attempts(&self) -> u32;

    fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts()
    }
}

/// Backoff policy of the retrying transport
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay_secs: u64,
    jitter: bool,
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one attempt
    pub fn new(max_attempts: u32, base_delay_secs: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_secs,
            jitter: true,
        }
    }

    /// Policy without jitter, for deterministic waits
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    pub fn base_delay_secs(&self) -> u64 {
        self.base_delay_secs
    }

    /// `min(D * 2^attempt, 60)` floored at `D`
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponential = self
            .base_delay_secs
            .saturating_mul(2_u64.saturating_pow(attempt))
            .min(MAX_BACKOFF_SECS);
        Duration::from_secs(exponential.max(self.base_delay_secs))
    }

    /// Wait before the next attempt; a positive server hint replaces the computed backoff
    pub fn wait_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let wait = match retry_after {
            Some(hint) if !hint.is_zero() => hint,
            _ => self.base_delay(attempt),
        };
        wait + self.jitter()
    }

    fn jitter(&self) -> Duration {
        if !self.jitter {
            return Duration::ZERO;
        }
        let mut rng = rand::thread_rng();
        Duration::from_millis(rng.gen_range(0..MAX_JITTER_MS))
    }
}

impl RetryStrategy for RetryPolicy {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.should_retry(attempt) {
            return None;
        }
        Some(self.wait_for(attempt, None))
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

/// Fixed delay retry strategy used for file operations
#[derive(Debug, Clone)]
pub struct FixedDelay {
    delay: Duration,
    max_attempts: u32,
}

impl FixedDelay {
    pub fn new(delay: Duration, max_attempts: u32) -> Self {
        Self {
            delay,
            max_attempts: max_attempts.max(1),
        }
    }
}

impl RetryStrategy for FixedDelay {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if !self.should_retry(attempt) {
            return None;
        }
        Some(self.delay)
    }

    fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

pub fn is_transient_status(status: u16) -> bool {
    TRANSIENT_STATUS_CODES.contains(&status) || THROTTLING_STATUS_CODES.contains(&status)
}

/// Parse a `Retry-After` header value: delta-seconds or an HTTP date.
/// Non-positive hints yield None so the caller falls back to its own backoff.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<i64>() {
        return (seconds > 0).then(|| Duration::from_secs(seconds as u64));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    let delta = at.signed_duration_since(now);
    delta
        .to_std()
        .ok()
        .filter(|d| !d.is_zero())
}

/// Run a file operation under the fixed-delay I/O policy.
///
/// Only [`FileStoreError::Io`] is retried; every other error returns at once.
/// The wait between attempts observes `cancel`.
pub async fn retry_io<T, F, Fut>(
    policy: &FixedDelay,
    cancel: &CancellationToken,
    operation: &str,
    mut op: F,
) -> Result<T, FileStoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FileStoreError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() => {
                let Some(delay) = policy.next_delay(attempt) else {
                    return Err(err);
                };
                warn!(
                    operation = operation,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "File operation failed, retrying"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(FileStoreError::Cancelled),
                    _ = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
