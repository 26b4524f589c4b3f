//! Bounded retry with a fixed delay between attempts.
//!
//! The executor is a plain wrapper around an async operation: callers decide what
//! is being retried by choosing what goes inside the closure. Wrapping a
//! [`crate::repo::with_connection`] call retries the whole guarded operation, so
//! every attempt acquires (and releases) its own connection.

use std::future::Future;
use std::time::Duration;

use log::{debug, warn};

use crate::error::{Error, Result};
use crate::params::Config;

/// Which failures are eligible for another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryOn {
    /// Only query execution errors.
    #[default]
    Query,
    /// Query execution errors and connection acquisition/release errors.
    QueryAndConnection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
    pub retry_on: RetryOn,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for RetryPolicy {
    fn from(config: &Config) -> Self {
        Self::new(config.max_retries(), config.retry_delay())
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            retry_on: RetryOn::Query,
        }
    }

    /// A policy that never retries.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn retry_on(mut self, retry_on: RetryOn) -> Self {
        self.retry_on = retry_on;
        self
    }

    /// Total number of invocations allowed by this policy.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Book-keeping of a single retry executor invocation.
#[derive(Debug)]
pub struct RetryState {
    policy: RetryPolicy,
    attempt: u32,
    remaining: u32,
    last_error: Option<Error>,
}

impl RetryState {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            attempt: 0,
            remaining: policy.max_retries,
            last_error: None,
        }
    }

    /// Attempts started so far.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Retries still available.
    pub fn remaining(&self) -> u32 {
        self.remaining
    }

    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }

    /// Marks the start of a new attempt and returns its (one based) number.
    pub fn begin(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    /// Records a failure of the current attempt.
    ///
    /// Returns the delay to wait before the next attempt, or the error to
    /// surface if the failure is not retryable or the budget is exhausted.
    pub fn fail(&mut self, err: Error) -> Result<Duration> {
        if !err.is_retryable(self.policy.retry_on) {
            debug!("attempt {} failed with a non retryable error", self.attempt);
            return Err(err);
        }
        if self.remaining == 0 {
            if self.policy.max_retries > 0 {
                warn!("giving up after {} attempts: {}", self.attempt, err);
            }
            return Err(err);
        }

        self.remaining -= 1;
        warn!(
            "attempt {} failed: {}. retrying in {:?}",
            self.attempt, err, self.policy.delay
        );
        self.last_error = Some(err);
        Ok(self.policy.delay)
    }
}

/// Invokes `op` up to `policy.max_retries + 1` times.
///
/// Returns the first successful result. When every attempt fails the error of
/// the last attempt is returned.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut state = RetryState::new(*policy);
    loop {
        let attempt = state.begin();
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("operation succeeded at attempt {}", attempt);
                }
                return Ok(value);
            }
            Err(err) => {
                let delay = state.fail(err)?;
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
