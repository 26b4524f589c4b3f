use super::{BatchCursor, RowStream, stream_rows};
use crate::error::{ConfigurationError, QueryError, Result};
use crate::repo::DataSource;
use crate::types::{Query, Value};

/// Streams the values of `column`, one row per window.
pub fn stream_column<S: DataSource>(source: S, query: &Query, column: &str) -> ColumnStream<S> {
    ColumnStream {
        rows: BatchCursor::new(source, query.project(column), 1).into_rows(),
        column: column.to_owned(),
    }
}

/// Like [`stream_column`], reading `batch_size` rows per window.
pub fn stream_column_windowed<S: DataSource>(
    source: S,
    query: &Query,
    column: &str,
    batch_size: usize,
) -> Result<ColumnStream<S>, ConfigurationError> {
    Ok(ColumnStream {
        rows: stream_rows(source, query.project(column), batch_size)?,
        column: column.to_owned(),
    })
}

/// Lazy sequence of the values of a single column.
pub struct ColumnStream<S: DataSource> {
    rows: RowStream<S>,
    column: String,
}

impl<S: DataSource> ColumnStream<S> {
    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn with_retry(mut self, policy: crate::retry::RetryPolicy) -> Self {
        self.rows = self.rows.with_retry(policy);
        self
    }

    pub async fn next_value(&mut self) -> Result<Option<Value>> {
        let Some(row) = self.rows.next_row().await? else {
            return Ok(None);
        };
        let value = row
            .get(&self.column)
            .cloned()
            .ok_or_else(|| QueryError::MissingColumn(self.column.clone()))?;
        Ok(Some(value))
    }

    /// Running mean of the numeric values. `NULL`s are skipped; `None` when no
    /// value was read.
    pub async fn average(mut self) -> Result<Option<f64>> {
        let mut sum = 0.0;
        let mut count = 0u64;

        let folded = loop {
            let value = match self.next_value().await {
                Ok(Some(value)) => value,
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            };
            if value.is_null() {
                continue;
            }
            match value.as_f64() {
                Some(x) => {
                    sum += x;
                    count += 1;
                }
                None => {
                    break Err(QueryError::NotNumeric {
                        column: self.column.clone(),
                        value: value.to_string(),
                    }
                    .into());
                }
            }
        };

        let closed = self.close().await;
        folded?;
        closed?;

        Ok((count > 0).then(|| sum / count as f64))
    }

    pub async fn close(self) -> Result<()> {
        self.rows.close().await
    }
}
