use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use log::trace;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow};
use sqlx::{Column, ConnectOptions, Connection as _, Row as _, TypeInfo, ValueRef};

use super::{Connection, DataSource};
use crate::error::{ConfigurationError, ConnectionError, QueryError};
use crate::types::{Dialect, Query, Row, RowSet, Value};

/// PostgreSQL server reachable through a `postgres://` url.
#[derive(Debug, Clone)]
pub struct PgSource {
    name: String,
    options: PgConnectOptions,
}

impl PgSource {
    pub fn from_url(url: &str) -> Result<Self, ConfigurationError> {
        let options =
            PgConnectOptions::from_str(url).map_err(|e| ConfigurationError::InvalidParam {
                key: "database url".to_owned(),
                value: url.to_owned(),
                msg: e.to_string(),
            })?;

        // Credentials are not part of the name, it ends up in logs
        let name = match url::Url::parse(url) {
            Ok(parsed) => format!(
                "{}:{}{}",
                parsed.host_str().unwrap_or("localhost"),
                parsed.port().unwrap_or(5432),
                parsed.path()
            ),
            Err(_) => "postgres".to_owned(),
        };

        Ok(Self { name, options })
    }
}

#[async_trait]
impl DataSource for PgSource {
    type Cx = PgCx;

    fn name(&self) -> &str {
        &self.name
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn connect(&self) -> Result<PgCx, ConnectionError> {
        let conn = self
            .options
            .connect()
            .await
            .map_err(|err| ConnectionError::Acquire {
                name: self.name.clone(),
                err,
            })?;

        Ok(PgCx {
            name: self.name.clone(),
            conn,
        })
    }
}

#[derive(Debug)]
pub struct PgCx {
    name: String,
    conn: PgConnection,
}

#[async_trait]
impl Connection for PgCx {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    async fn execute(&mut self, query: &Query) -> Result<RowSet, QueryError> {
        trace!("executing `{}`", query);

        let mut q = sqlx::query(query.statement());
        for param in query.params() {
            q = match param {
                Value::Null => q.bind(None::<String>),
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

fn decode_rows(rows: &[PgRow]) -> Result<RowSet, QueryError> {
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

fn decode_cell(row: &PgRow, idx: usize) -> Result<Value, QueryError> {
    if row.try_get_raw(idx)?.is_null() {
        return Ok(Value::Null);
    }

    let column = &row.columns()[idx];
    let type_name = column.type_info().name().to_owned();

    let value = match type_name.as_str() {
        "BOOL" => Value::Boolean(row.try_get::<bool, _>(idx)?),
        "INT2" => Value::Integer(row.try_get::<i16, _>(idx)?.into()),
        "INT4" => Value::Integer(row.try_get::<i32, _>(idx)?.into()),
        "INT8" => Value::Integer(row.try_get::<i64, _>(idx)?),
        "FLOAT4" => Value::Float(row.try_get::<f32, _>(idx)?.into()),
        "FLOAT8" => Value::Float(row.try_get::<f64, _>(idx)?),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => Value::Text(row.try_get::<String, _>(idx)?),
        "UUID" => Value::Text(row.try_get::<sqlx::types::Uuid, _>(idx)?.to_string()),
        "JSON" | "JSONB" => {
            Value::Text(row.try_get::<sqlx::types::JsonValue, _>(idx)?.to_string())
        }
        _ => {
            return Err(QueryError::UnsupportedType {
                column: column.name().to_owned(),
                type_name,
            });
        }
    };

    Ok(value)
}
