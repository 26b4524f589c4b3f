use std::collections::VecDeque;

use futures::Stream;

use super::{BatchCursor, stream_batches};
use crate::error::{ConfigurationError, Result};
use crate::repo::DataSource;
use crate::retry::RetryPolicy;
use crate::types::{Query, Row};

/// Streams the rows of `query` one at a time, reading `batch_size` rows per
/// window.
pub fn stream_rows<S: DataSource>(
    source: S,
    query: Query,
    batch_size: usize,
) -> Result<RowStream<S>, ConfigurationError> {
    Ok(stream_batches(source, query, batch_size)?.into_rows())
}

/// Lazy sequence of rows backed by a [`BatchCursor`].
///
/// At most one window is buffered.
pub struct RowStream<S: DataSource> {
    cursor: BatchCursor<S>,
    buffer: VecDeque<Row>,
}

impl<S: DataSource> BatchCursor<S> {
    /// Flattens the cursor into single rows.
    pub fn into_rows(self) -> RowStream<S> {
        RowStream {
            cursor: self,
            buffer: VecDeque::new(),
        }
    }
}

impl<S: DataSource> RowStream<S> {
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.cursor = self.cursor.with_retry(policy);
        self
    }

    pub fn query(&self) -> &Query {
        self.cursor.query()
    }

    pub async fn next_row(&mut self) -> Result<Option<Row>> {
        loop {
            if let Some(row) = self.buffer.pop_front() {
                return Ok(Some(row));
            }

            match self.cursor.next_batch().await? {
                Some(batch) => self.buffer.extend(batch),
                None => return Ok(None),
            }
        }
    }

    /// Releases the connection, buffered rows are discarded.
    pub async fn close(mut self) -> Result<()> {
        self.buffer.clear();
        self.cursor.close().await
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<Row>> {
        futures::stream::try_unfold(self, |mut rows| async move {
            Ok(rows.next_row().await?.map(|row| (row, rows)))
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;

    use super::*;
    use crate::repo::testing::{ScriptedSource, users, wait_released};

    fn all_users() -> Query {
        Query::new("SELECT * FROM user_data")
    }

    #[tokio::test]
    async fn rows_arrive_one_at_a_time_across_windows() {
        let source = ScriptedSource::with_users(7);
        let mut rows = stream_rows(source.clone(), all_users(), 3).unwrap();

        let mut seen = Vec::new();
        while let Some(row) = rows.next_row().await.unwrap() {
            seen.push(row);
            // never more than one window ahead of the consumer
            assert!(source.stats().executes <= seen.len().div_ceil(3));
        }

        assert_eq!(seen, users(7));
        assert_eq!(source.stats().executes, 3);
        assert_eq!(source.stats().open(), 0);
    }

    #[tokio::test]
    async fn early_close_releases() {
        let source = ScriptedSource::with_users(12);
        let mut rows = stream_rows(source.clone(), all_users(), 5).unwrap();

        rows.next_row().await.unwrap();
        rows.next_row().await.unwrap();
        rows.close().await.unwrap();

        assert_eq!(source.stats().executes, 1);
        assert_eq!(source.stats().open(), 0);
    }

    #[tokio::test]
    async fn stream_adapter_yields_rows() {
        let source = ScriptedSource::with_users(12);
        let rows: Vec<Row> = stream_rows(source.clone(), all_users(), 5)
            .unwrap()
            .into_stream()
            .try_collect()
            .await
            .unwrap();

        assert_eq!(rows.len(), 12);
        assert_eq!(source.stats().open(), 0);
    }

    #[tokio::test]
    async fn dropped_stream_releases_in_background() {
        let source = ScriptedSource::with_users(12);
        let mut rows = stream_rows(source.clone(), all_users(), 5).unwrap();
        rows.next_row().await.unwrap();
        drop(rows);

        wait_released(&source).await;
        assert_eq!(source.stats().closes, 1);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let err = stream_rows(ScriptedSource::with_users(1), all_users(), 0).err();
        assert_eq!(err, Some(ConfigurationError::ZeroBatchSize));
    }
}
