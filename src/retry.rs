//! Retry with exponential backoff and jitter
//!
//! The retrier wraps transport-layer operations: retryable failures sleep
//! and re-attempt, everything else returns immediately. Cancellation is
//! observed during both the operation and the backoff sleep.

use std::collections::HashSet;
use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio_util::sync::CancellationToken;

use crate::errors::{CrawlError, ErrorKind};

/// Backoff shape and retry budget
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Re-attempts after the first try; 2 means up to 3 invocations total
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Jitter fraction J: each sleep is scaled by `1 + uniform(-J, +J)`
    pub jitter: f64,
    /// Kinds eligible for re-attempt
    pub retryable: HashSet<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
            multiplier: 2.0,
            jitter: 0.2,
            retryable: [
                ErrorKind::Network,
                ErrorKind::Timeout,
                ErrorKind::RateLimit,
                ErrorKind::ServerError,
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never re-attempts
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable.contains(&kind)
    }
}

/// What a retried operation ended up doing
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, CrawlError>,
    /// Invocations made, at least 1
    pub attempts: u32,
    pub total_duration: Duration,
}

impl<T> RetryOutcome<T> {
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.result.is_ok()
    }
}

/// Runs operations under a [`RetryPolicy`]
#[derive(Debug, Clone)]
pub struct Retrier {
    policy: RetryPolicy,
}

impl Retrier {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// Invoke `op` until it succeeds, fails non-retryably, exhausts the
    /// budget, or `cancel` fires.
    ///
    /// `op` is a factory producing a fresh future per attempt. On
    /// cancellation the outcome's error kind is [`ErrorKind::Cancelled`].
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, mut op: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CrawlError>>,
    {
        let started = Instant::now();
        let mut delay = self.policy.initial_delay;
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return RetryOutcome {
                        result: Err(CrawlError::cancelled("", "retry")),
                        attempts,
                        total_duration: started.elapsed(),
                    };
                }
                result = op() => result,
            };

            let err = match result {
                Ok(value) => {
                    return RetryOutcome {
                        result: Ok(value),
                        attempts,
                        total_duration: started.elapsed(),
                    };
                }
                Err(err) => err,
            };

            if !self.policy.is_retryable(err.kind) || attempts > self.policy.max_retries {
                return RetryOutcome {
                    result: Err(err),
                    attempts,
                    total_duration: started.elapsed(),
                };
            }

            log::debug!(
                "retrying {} (attempt {}/{}) after {:?}: {}",
                err.operation,
                attempts,
                self.policy.max_retries + 1,
                delay,
                err.message
            );

            let sleep_for = jittered(delay, self.policy.jitter);
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    return RetryOutcome {
                        result: Err(CrawlError::cancelled(err.url, "retry-sleep")),
                        attempts,
                        total_duration: started.elapsed(),
                    };
                }
                () = tokio::time::sleep(sleep_for) => {}
            }

            delay = Duration::from_secs_f64(
                (delay.as_secs_f64() * self.policy.multiplier)
                    .min(self.policy.max_delay.as_secs_f64()),
            );
        }
    }
}

/// Scale `delay` by `1 + uniform(-jitter, +jitter)`
fn jittered(delay: Duration, jitter: f64) -> Duration {
    if jitter <= 0.0 {
        return delay;
    }
    let factor = 1.0 + rand::rng().random_range(-jitter..=jitter);
    Duration::from_secs_f64((delay.as_secs_f64() * factor).max(0.0))
}
