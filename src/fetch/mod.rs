//! Concurrent execution of independent fetch operations.
//!
//! Every [`FetchOp`] runs as its own tokio task, so branches never share a
//! connection and a slow branch does not hold back the others. Results are
//! reported in input order whatever the completion order.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::FutureExt;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, trace, warn};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};

use crate::error::{AggregateFetchError, Branch, BranchOutcome, ConfigurationError, Error, Result};
use crate::params;

/// A labelled, owned unit of work.
pub struct FetchOp<T> {
    label: String,
    fut: BoxFuture<'static, Result<T>>,
}

impl<T> FetchOp<T> {
    pub fn new<F>(label: impl Into<String>, fut: F) -> Self
    where
        F: Future<Output = Result<T>> + Send + 'static,
    {
        Self {
            label: label.into(),
            fut: Box::pin(fut),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

/// Runs every operation concurrently, without an in-flight limit.
pub async fn fetch_concurrently<T>(ops: Vec<FetchOp<T>>) -> Result<Vec<T>, AggregateFetchError<T>>
where
    T: Send + 'static,
{
    FetchCoordinator::unbounded().run(ops).await
}

/// Runs fetch operations concurrently with at most `max_concurrent` in flight.
#[derive(Debug, Clone)]
pub struct FetchCoordinator {
    max_concurrent: usize,
}

impl Default for FetchCoordinator {
    fn default() -> Self {
        Self {
            max_concurrent: params::DEFAULT_MAX_CONCURRENT_FETCHES,
        }
    }
}

impl FetchCoordinator {
    pub fn new(max_concurrent: usize) -> Result<Self, ConfigurationError> {
        if max_concurrent == 0 {
            return Err(ConfigurationError::ZeroConcurrency);
        }
        Ok(Self {
            max_concurrent: max_concurrent.min(Semaphore::MAX_PERMITS),
        })
    }

    pub fn unbounded() -> Self {
        Self {
            max_concurrent: Semaphore::MAX_PERMITS,
        }
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Waits for every operation to finish.
    ///
    /// Returns the results in input order when all of them succeed, otherwise
    /// an [`AggregateFetchError`] reporting every branch. A branch that panics
    /// is reported as [`Error::Task`].
    pub async fn run<T>(&self, ops: Vec<FetchOp<T>>) -> Result<Vec<T>, AggregateFetchError<T>>
    where
        T: Send + 'static,
    {
        let start = Instant::now();
        let total = ops.len();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));

        let mut labels = Vec::with_capacity(total);
        let mut jobs = FuturesUnordered::new();

        for (index, op) in ops.into_iter().enumerate() {
            let FetchOp { label, fut } = op;
            let semaphore = semaphore.clone();

            let handle = tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Task(format!("semaphore acquire failed: {e}")))?;
                fut.await
            });

            trace!("spawned fetch #{} `{}`", index, label);
            labels.push(label);
            jobs.push(AbortOnDrop(handle).map(move |joined| (index, joined)));
        }

        let mut outcomes: Vec<Option<BranchOutcome<T>>> = (0..total).map(|_| None).collect();

        while let Some((index, joined)) = jobs.next().await {
            let outcome = match joined {
                Ok(Ok(value)) => BranchOutcome::Succeeded(value),
                Ok(Err(err)) => {
                    debug!("fetch #{} `{}` failed: {}", index, labels[index], err);
                    BranchOutcome::Failed(err)
                }
                Err(join) => {
                    warn!("fetch #{} `{}` did not complete: {}", index, labels[index], join);
                    BranchOutcome::Failed(task_error(join))
                }
            };
            outcomes[index] = Some(outcome);
        }

        let elapsed = start.elapsed();
        debug!(
            "{} concurrent fetches required {}us ({} concurrent)",
            total,
            elapsed.as_micros(),
            self.max_concurrent.min(total)
        );

        let branches: Vec<Branch<T>> = labels
            .into_iter()
            .zip(outcomes)
            .enumerate()
            .map(|(index, (label, outcome))| Branch {
                index,
                label,
                outcome: outcome
                    .unwrap_or_else(|| BranchOutcome::Failed(Error::Task("result lost".into()))),
            })
            .collect();

        if branches.iter().all(|b| b.outcome.is_success()) {
            let values = branches
                .into_iter()
                .filter_map(|b| match b.outcome {
                    BranchOutcome::Succeeded(value) => Some(value),
                    BranchOutcome::Failed(_) => None,
                })
                .collect();
            return Ok(values);
        }

        Err(AggregateFetchError { branches })
    }
}

fn task_error(err: JoinError) -> Error {
    if err.is_panic() {
        Error::Task("branch panicked".to_owned())
    } else {
        Error::Task("branch cancelled".to_owned())
    }
}

/// Aborts the task if the coordinator is dropped before the branch completes.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl<T> Future for AbortOnDrop<T> {
    type Output = std::result::Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}
