use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use log::trace;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Column, ConnectOptions, Connection as _, Row as _, TypeInfo, ValueRef};

use super::{Connection, DataSource};
use crate::error::{ConfigurationError, ConnectionError, QueryError};
use crate::types::{Dialect, Query, Row, RowSet, Value};

/// SQLite database reachable through a file path or a `sqlite://` url.
///
/// Every call to [`DataSource::connect`] opens a brand new connection, the
/// database file is created if missing.
#[derive(Debug, Clone)]
pub struct SqliteSource {
    name: String,
    options: SqliteConnectOptions,
}

impl SqliteSource {
    pub fn from_url(url: &str) -> Result<Self, ConfigurationError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| ConfigurationError::InvalidParam {
                key: "database url".to_owned(),
                value: url.to_owned(),
                msg: e.to_string(),
            })?
            .create_if_missing(true);

        Ok(Self {
            name: url.to_owned(),
            options,
        })
    }

    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self {
            name: path.display().to_string(),
            options: SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true),
        }
    }
}

#[async_trait]
impl DataSource for SqliteSource {
    type Cx = SqliteCx;

    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn connect(&self) -> Result<SqliteCx, ConnectionError> {
        let conn = self
            .options
            .connect()
            .await
            .map_err(|err| ConnectionError::Acquire {
                name: self.name.clone(),
                err,
            })?;

        Ok(SqliteCx {
            name: self.name.clone(),
            conn,
        })
    }
}

/// A single open SQLite connection.
#[derive(Debug)]
pub struct SqliteCx {
    name: String,
    conn: SqliteConnection,
}

#[async_trait]
impl Connection for SqliteCx {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn execute(&mut self, query: &Query) -> Result<RowSet, QueryError> {
        trace!("executing `{}`", query);

        let mut q = sqlx::query(query.statement());
        for param in query.params() {
            q = match param {
                Value::Null => q.bind(None::<i64>),
                Value::Boolean(v) => q.bind(*v),
                Value::Integer(v) => q.bind(*v),
                Value::Float(v) => q.bind(*v),
                Value::Text(v) => q.bind(v.clone()),
            };
        }

        let rows = q.fetch_all(&mut self.conn).await?;
        trace!("fetched {} rows", rows.len());

        decode_rows(&rows)
    }

    async fn close(self) -> Result<(), ConnectionError> {
        self.conn
            .close()
            .await
            .map_err(|err| ConnectionError::Release {
                name: self.name,
                err,
            })
    }
}

fn decode_rows(rows: &[SqliteRow]) -> Result<RowSet, QueryError> {
    let Some(first) = rows.first() else {
        return Ok(Vec::new());
    };

    let columns: Arc<[String]> = first
        .columns()
        .iter()
        .map(|c| c.name().to_owned())
        .collect();

    rows.iter()
        .map(|row| {
            let values = (0..columns.len())
                .map(|idx| decode_cell(row, idx))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Row::new(columns.clone(), values))
        })
        .collect()
}

fn decode_cell(row: &SqliteRow, idx: usize) -> Result<Value, QueryError> {
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(Value::Null);
    }

    // Declared booleans are stored as integers
    let column = &row.columns()[idx];
    if column.type_info().name() == "BOOLEAN" {
        return Ok(Value::Boolean(row.try_get_unchecked::<bool, _>(idx)?));
    }

    let type_name = raw.type_info().name().to_owned();
    let value = match type_name.as_str() {
        "INTEGER" => Value::Integer(row.try_get_unchecked::<i64, _>(idx)?),
        "REAL" => Value::Float(row.try_get_unchecked::<f64, _>(idx)?),
        "TEXT" => Value::Text(row.try_get_unchecked::<String, _>(idx)?),
        _ => {
            return Err(QueryError::UnsupportedType {
                column: column.name().to_owned(),
                type_name,
            });
        }
    };

    Ok(value)
}
