//! Retry logic with exponential backoff
//!
//! [`RetryPolicy`] is a reusable policy object: maximum attempts, base delay,
//! backoff multiplier, jitter flag and a retryable-error predicate. Every
//! network call site receives one instead of looping inline.
//!
//! # Example
//!
//! ```no_run
//! use class_showcase::config::RetryConfig;
//! use class_showcase::retry::RetryPolicy;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> class_showcase::Result<()> {
//! let policy = RetryPolicy::new(&RetryConfig::default());
//! let cancel = CancellationToken::new();
//! let body = policy
//!     .run(&cancel, "fetch course", || async {
//!         Ok::<_, class_showcase::Error>("ok".to_string())
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, 5xx, rate limiting, connection resets) return `true`.
/// Permanent failures (4xx, malformed responses, bad credentials, corrupt data) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => {
                if e.is_timeout() || e.is_connect() {
                    return true;
                }
                // Body/stream interruptions surface as request errors without a status
                match e.status() {
                    Some(status) => status.is_server_error() || status.as_u16() == 429,
                    None => e.is_request() || e.is_body(),
                }
            }
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::NotConnected
                    | std::io::ErrorKind::BrokenPipe
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::UnexpectedEof
            ),
            Error::Api { status, .. } => *status >= 500,
            Error::RateLimited { .. } => true,
            Error::Authentication(_)
            | Error::Config { .. }
            | Error::AssignmentNotFound { .. }
            | Error::TransientFailureExhausted { .. }
            | Error::ArchiveCorrupt { .. }
            | Error::MalformedResponse { .. }
            | Error::ExportFailed(_)
            | Error::ExportTimeout { .. }
            | Error::NoSectionsSucceeded { .. }
            | Error::InvalidTransition { .. }
            | Error::ExternalTool(_)
            | Error::Cancelled
            | Error::Serialization(_)
            | Error::TomlParse(_)
            | Error::Other(_) => false,
        }
    }
}

type Predicate = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Bounded exponential-backoff retry policy
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_delay: Duration,
    max_delay: Duration,
    backoff_multiplier: f64,
    jitter: bool,
    predicate: Predicate,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Build a policy from configuration, classifying errors with [`IsRetryable`]
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: config.initial_delay,
            max_delay: config.max_delay,
            backoff_multiplier: config.backoff_multiplier,
            jitter: config.jitter,
            predicate: Arc::new(|e: &Error| e.is_retryable()),
        }
    }

    /// Replace the retryable-error predicate
    #[must_use]
    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&Error) -> bool + Send + Sync + 'static,
    {
        self.predicate = Arc::new(predicate);
        self
    }

    /// Override the attempt budget
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Whether the policy would retry this error
    pub fn should_retry(&self, error: &Error) -> bool {
        (self.predicate)(error)
    }

    /// Delay before retry number `retry` (1-based), before jitter
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Execute an async operation, retrying transient failures
    ///
    /// Returns the first success, the first non-retryable error unchanged, or
    /// [`Error::TransientFailureExhausted`] wrapping the last error once the
    /// attempt budget is spent. Waiting between attempts is abandoned with
    /// [`Error::Cancelled`] when `cancel` fires.
    pub async fn run<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        operation_name: &str,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            attempt += 1;

            let error = match operation().await {
                Ok(result) => {
                    if attempt > 1 {
                        tracing::info!(
                            operation = operation_name,
                            attempts = attempt,
                            "operation succeeded after retry"
                        );
                    }
                    return Ok(result);
                }
                Err(e) => e,
            };

            if !self.should_retry(&error) {
                tracing::debug!(
                    operation = operation_name,
                    error = %error,
                    "operation failed with non-retryable error"
                );
                return Err(error);
            }

            if attempt >= self.max_attempts {
                tracing::warn!(
                    operation = operation_name,
                    error = %error,
                    attempts = attempt,
                    "operation failed after all retry attempts exhausted"
                );
                return Err(Error::TransientFailureExhausted {
                    attempts: attempt,
                    last: Box::new(error),
                });
            }

            let mut delay = self.backoff_delay(attempt);
            if self.jitter {
                delay = add_jitter(delay);
            }
            if let Error::RateLimited { retry_after } = &error {
                delay = delay.max(*retry_after);
            }

            tracing::warn!(
                operation = operation_name,
                error = %error,
                attempt,
                max_attempts = self.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "operation failed, retrying"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The result lies between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
