//! # Repository Module
//!
//! Boundary between the data-access core and the underlying row-oriented data
//! source.
//!
//! * [`DataSource`] hands out exclusively owned [`Connection`]s.
//! * [`with_connection`] scopes one connection to one operation and guarantees it
//!   is released on every exit path.
//! * [`SqliteSource`] and [`PgSource`] implement the boundary on top of `sqlx`.
//! * [`FacadeFetch`] composes guard, retry, cache and cursors behind a single
//!   handle.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{ConnectionError, QueryError};
use crate::types::{Dialect, Query, RowSet};

mod guard;
pub use guard::*;
pub(crate) use guard::release_in_background;

mod sqlite;
pub use sqlite::*;

mod postgres;
pub use postgres::*;

mod facades;
pub use facades::*;

pub mod seed;

#[cfg(test)]
pub mod testing;

/// Something able to open connections to a row-oriented data source.
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    type Cx: Connection;

    /// Human readable name of the source, used in logs and errors.
    fn name(&self) -> &str;

    /// Placeholder syntax of the connections handed out by this source.
    fn dialect(&self) -> Dialect;

    async fn connect(&self) -> Result<Self::Cx, ConnectionError>;
}

/// An exclusively owned connection.
///
/// A connection is consumed by [`Connection::close`], so it cannot be used
/// after being released.
#[async_trait]
pub trait Connection: Send + 'static {
    fn dialect(&self) -> Dialect;

    async fn execute(&mut self, query: &Query) -> Result<RowSet, QueryError>;

    async fn close(self) -> Result<(), ConnectionError>;
}

#[async_trait]
impl<S: DataSource> DataSource for Arc<S> {
    type Cx = S::Cx;

    fn name(&self) -> &str {
        self.as_ref().name()
    }

    fn dialect(&self) -> Dialect {
        self.as_ref().dialect()
    }

    async fn connect(&self) -> Result<Self::Cx, ConnectionError> {
        self.as_ref().connect().await
    }
}
