use crate::error::ConnectorResult;
use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Delay between two attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay after every failed attempt
    Constant(Duration),
    /// `base + increment * attempt`, with attempts counted from 1
    Linear { base: Duration, increment: Duration },
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Constant(delay) => *delay,
            Backoff::Linear { base, increment } => *base + *increment * attempt,
        }
    }
}

/// Retry any failing operation a bounded number of times.
///
/// Unlike [`retry_transient`], every error is retried: this is meant to wrap
/// whole calls such as establishing a database connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Backoff) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Ten attempts, waiting 5s + 0.5s per attempt in between.
    pub fn connection_default() -> Self {
        Self {
            max_attempts: 10,
            backoff: Backoff::Linear {
                base: Duration::from_secs(5),
                increment: Duration::from_millis(500),
            },
        }
    }

    /// Run `operation` until it succeeds or the attempts are exhausted.
    ///
    /// # Returns
    ///
    /// The first successful result, or the error of the last attempt.
    pub async fn run<F, Fut, T, E>(&self, operation_name: &str, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Debug,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if attempt >= max_attempts => return Err(e),
                Err(e) => {
                    let delay = self.backoff.delay(attempt);
                    warn!(
                        "Attempt {}/{} of {} failed, retrying in {:?}: {:?}",
                        attempt, max_attempts, operation_name, delay, e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Retry an operation on transient network errors only.
///
/// `max_retries` is the number of retries after the first attempt. Delays
/// grow exponentially: 100ms, 200ms, 400ms, ... capped at 2^10 * 100ms.
pub async fn retry_transient<F, Fut, T>(
    max_retries: usize,
    operation_name: &str,
    mut operation: F,
) -> ConnectorResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ConnectorResult<T>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => {
                if !e.is_transient() || attempt >= max_retries {
                    return Err(e);
                }

                warn!(
                    "Retryable error in {} (attempt {}/{}): {:?}",
                    operation_name,
                    attempt + 1,
                    max_retries,
                    e
                );

                let backoff_ms = 100 * (1u64 << attempt.min(10));
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                attempt += 1;
            }
        }
    }
}
