//! Error taxonomy shared by every component of the data-access layer.
//!
//! Each concern has its own error kind so that callers (and the retry executor)
//! can decide what to do with a failure without inspecting messages:
//!
//! * [`ConnectionError`]: a connection could not be acquired or released.
//! * [`QueryError`]: execution failed against a live connection. This is the only
//!   kind retried automatically.
//! * [`ConfigurationError`]: invalid settings. Fails fast and is never retried.
//! * [`AggregateFetchError`]: one or more concurrent branches failed.

use std::fmt;

use crate::retry::RetryOn;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(thiserror::Error, Debug)]
pub enum ConnectionError {
    #[error("unable to connect to `{name}` :: {err}")]
    Acquire {
        name: String,
        #[source]
        err: sqlx::Error,
    },
    #[error("unable to release connection to `{name}` :: {err}")]
    Release {
        name: String,
        #[source]
        err: sqlx::Error,
    },
    #[error("connection refused by `{0}`")]
    Refused(String),
    #[error("connection release failed for `{0}`")]
    ReleaseFailed(String),
}

#[derive(thiserror::Error, Debug)]
pub enum QueryError {
    #[error("database error :: {0}")]
    Database(#[from] sqlx::Error),
    #[error("query execution failed :: {0}")]
    Execution(String),
    #[error("unsupported type `{type_name}` for column `{column}`")]
    UnsupportedType { column: String, type_name: String },
    #[error("column `{0}` not found in result")]
    MissingColumn(String),
    #[error("value of column `{column}` is not numeric: {value}")]
    NotNumeric { column: String, value: String },
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("batch size must be greater than zero")]
    ZeroBatchSize,
    #[error("concurrency limit must be greater than zero")]
    ZeroConcurrency,
    #[error("invalid value `{value}` for `{key}`: {msg}")]
    InvalidParam {
        key: String,
        value: String,
        msg: String,
    },
    #[error("unsupported database url `{0}`")]
    UnsupportedUrl(String),
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("connection error :: {0}")]
    Connection(#[from] ConnectionError),
    #[error("query error :: {0}")]
    Query(#[from] QueryError),
    #[error("configuration error :: {0}")]
    Configuration(#[from] ConfigurationError),
    /// The guarded operation failed and releasing its connection failed too.
    /// `original` is the operation error and takes precedence.
    #[error("{original} (connection release also failed :: {release})")]
    ReleaseAfterFailure {
        original: Box<Error>,
        release: ConnectionError,
    },
    #[error("fetch task failed :: {0}")]
    Task(String),
}

impl Error {
    /// Returns `true` when the failure may go away on a later attempt under the
    /// given eligibility rule.
    pub fn is_retryable(&self, on: RetryOn) -> bool {
        match self {
            Error::Query(_) => true,
            Error::Connection(_) => on == RetryOn::QueryAndConnection,
            Error::ReleaseAfterFailure { original, .. } => original.is_retryable(on),
            Error::Configuration(_) | Error::Task(_) => false,
        }
    }

    /// The error that caused the failure, looking through release failures.
    pub fn original(&self) -> &Error {
        match self {
            Error::ReleaseAfterFailure { original, .. } => original.original(),
            other => other,
        }
    }
}

/// Outcome of one branch of a concurrent fetch.
#[derive(Debug)]
pub enum BranchOutcome<T> {
    Succeeded(T),
    Failed(Error),
}

impl<T> BranchOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, BranchOutcome::Succeeded(_))
    }
}

/// A branch report: its position in the input, its label and what happened.
#[derive(Debug)]
pub struct Branch<T> {
    pub index: usize,
    pub label: String,
    pub outcome: BranchOutcome<T>,
}

/// One or more concurrent branches failed.
///
/// Every branch is reported in input order, succeeded ones keep their result.
#[derive(Debug)]
pub struct AggregateFetchError<T> {
    pub branches: Vec<Branch<T>>,
}

impl<T> AggregateFetchError<T> {
    pub fn failed(&self) -> impl Iterator<Item = (&Branch<T>, &Error)> {
        self.branches.iter().filter_map(|b| match &b.outcome {
            BranchOutcome::Failed(e) => Some((b, e)),
            BranchOutcome::Succeeded(_) => None,
        })
    }

    pub fn succeeded(&self) -> impl Iterator<Item = (&Branch<T>, &T)> {
        self.branches.iter().filter_map(|b| match &b.outcome {
            BranchOutcome::Succeeded(v) => Some((b, v)),
            BranchOutcome::Failed(_) => None,
        })
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }

    pub fn into_branches(self) -> Vec<Branch<T>> {
        self.branches
    }
}

impl<T> fmt::Display for AggregateFetchError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} of {} concurrent fetches failed",
            self.failed_count(),
            self.branches.len()
        )?;
        for (branch, err) in self.failed() {
            write!(f, "; #{} `{}`: {}", branch.index, branch.label, err)?;
        }
        Ok(())
    }
}

impl<T: fmt::Debug> std::error::Error for AggregateFetchError<T> {}
