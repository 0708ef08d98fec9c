//! Retry with exponential backoff, and a per-dependency circuit breaker.
//!
//! Every call to the embedding model, the vector store and the LLM passes
//! through both: [`retry_with_backoff`] on the outside, a
//! [`CircuitBreaker::execute`] per attempt on the inside. The pairing is done
//! by the decorators in [`crate::guard`].
//!
//! # Classification
//!
//! [`is_retryable`] walks the error chain:
//!
//! | Cause | Retry? |
//! |---|---|
//! | [`ChatError::CircuitOpen`] | never |
//! | [`ChatError::Validation`] / [`ChatError::NotFound`] | never |
//! | [`CallError::Network`] (reset, timeout, DNS, refused, unreachable) | yes |
//! | [`CallError::Status`] 429, 502, 503, 504 | yes |
//! | [`CallError::Status`] other 4xx | never |
//! | anything else | yes |

use std::fmt;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{error, info, warn};

use crate::error::ChatError;

/// Transport-level failure reported by a collaborator client.
///
/// HTTP-backed services map their client errors into this type so the
/// retry classifier can tell rate limits and outages from bad requests.
#[derive(Debug, Error)]
pub enum CallError {
    #[error("network error ({kind}): {message}")]
    Network {
        kind: NetworkErrorKind,
        message: String,
    },

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    ConnectionReset,
    Timeout,
    DnsFailure,
    ConnectionRefused,
    Unreachable,
    Other,
}

impl fmt::Display for NetworkErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::ConnectionReset => "connection reset",
            Self::Timeout => "timeout",
            Self::DnsFailure => "dns failure",
            Self::ConnectionRefused => "connection refused",
            Self::Unreachable => "network unreachable",
            Self::Other => "other",
        };
        f.write_str(s)
    }
}

/// Backoff schedule for [`retry_with_backoff`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryOptions {
    /// Total attempts, including the first. Values below 1 are treated as 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
        }
    }
}

impl RetryOptions {
    /// Sleep before the retry that follows failed attempt `attempt` (0-based):
    /// `min(max_delay, initial_delay * 2^attempt)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        2u32.checked_pow(attempt)
            .and_then(|factor| self.initial_delay.checked_mul(factor))
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

/// Decide whether a failed call is worth another attempt.
pub fn is_retryable(err: &anyhow::Error) -> bool {
    for cause in err.chain() {
        if let Some(chat_err) = cause.downcast_ref::<ChatError>() {
            if chat_err.is_client_error() || matches!(chat_err, ChatError::CircuitOpen { .. }) {
                return false;
            }
            continue;
        }
        if let Some(call_err) = cause.downcast_ref::<CallError>() {
            return match call_err {
                CallError::Network { .. } => true,
                CallError::Status { status, .. } => match status {
                    429 | 502 | 503 | 504 => true,
                    400..=499 => false,
                    _ => true,
                },
            };
        }
    }
    // Unclassified failures (including bare "timeout" / "ECONNRESET" messages)
    // are retried.
    true
}

/// Run `operation` up to `options.max_attempts` times.
///
/// Non-retryable errors are returned immediately. Retryable ones are retried
/// after the [`RetryOptions::delay_for`] backoff until attempts run out, and
/// then the last error is returned unchanged.
pub async fn retry_with_backoff<T, F, Fut>(mut operation: F, options: &RetryOptions) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = options.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !is_retryable(&err) {
                    return Err(err);
                }
                if attempt + 1 >= max_attempts {
                    error!(attempts = max_attempts, error = %format!("{:#}", err), "retries exhausted");
                    return Err(err);
                }
                let delay = options.delay_for(attempt);
                info!(
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %format!("{:#}", err),
                    "retrying after failure"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    failure_count: u32,
    open_until: Option<Instant>,
}

/// Failure counter that stops calling a dependency for `cooldown` once
/// `failure_threshold` consecutive failures have been seen.
///
/// There is no explicit half-open state: the first call after the cooldown is
/// let through, and its outcome decides what happens next.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    cooldown: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
    pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(30_000);

    pub fn new(name: impl Into<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Breaker with the default threshold (5) and cooldown (30s).
    pub fn with_defaults(name: impl Into<String>) -> Self {
        Self::new(
            name,
            Self::DEFAULT_FAILURE_THRESHOLD,
            Self::DEFAULT_COOLDOWN,
        )
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True while calls are being rejected.
    pub fn is_open(&self) -> bool {
        matches!(self.lock().open_until, Some(until) if Instant::now() < until)
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    /// Run `operation` unless the breaker is open.
    ///
    /// While open, fails with [`ChatError::CircuitOpen`] without invoking
    /// `operation`. The operation's own error is always passed through.
    pub async fn execute<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if self.is_open() {
            return Err(ChatError::CircuitOpen {
                dependency: self.name.clone(),
            }
            .into());
        }

        match operation().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(err) => {
                self.record_failure();
                Err(err)
            }
        }
    }

    fn record_success(&self) {
        let mut state = self.lock();
        if state.open_until.take().is_some() {
            info!(dependency = %self.name, "circuit breaker reset");
        }
        state.failure_count = 0;
    }

    fn record_failure(&self) {
        let mut state = self.lock();
        state.failure_count += 1;
        if state.failure_count >= self.failure_threshold {
            state.open_until = Some(Instant::now() + self.cooldown);
            state.failure_count = 0;
            warn!(
                dependency = %self.name,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "circuit breaker opened"
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
