//! Lazy batched reads.
//!
//! A [`BatchCursor`] splits one logical query into consecutive offset/limit
//! windows and fetches them one at a time, on demand. The cursor owns a single
//! connection from the first pull until exhaustion, failure or abandonment.

use futures::Stream;
use log::{debug, trace, warn};

use crate::error::{ConfigurationError, Error, Result};
use crate::repo::{Connection, DataSource, release_in_background};
use crate::retry::{RetryPolicy, RetryState};
use crate::types::{Batch, Query, RowSet};

mod column;
pub use column::*;

mod rows;
pub use rows::*;

/// Creates a cursor over `query` reading `batch_size` rows at a time.
///
/// Nothing is executed until the first call to [`BatchCursor::next_batch`].
pub fn stream_batches<S: DataSource>(
    source: S,
    query: Query,
    batch_size: usize,
) -> Result<BatchCursor<S>, ConfigurationError> {
    if batch_size == 0 {
        return Err(ConfigurationError::ZeroBatchSize);
    }

    Ok(BatchCursor::new(source, query, batch_size))
}

/// Forward-only, non-restartable sequence of [`Batch`]es.
///
/// Dropping a cursor that still holds its connection releases it in the
/// background on the current tokio runtime. Use [`BatchCursor::close`] to
/// release it deterministically.
pub struct BatchCursor<S: DataSource> {
    source: S,
    query: Query,
    batch_size: usize,
    retry: RetryPolicy,
    cx: Option<S::Cx>,
    offset: usize,
    batches_yielded: usize,
    rows_yielded: usize,
    done: bool,
    /// Release failure observed after the last batch was produced.
    pending: Option<Error>,
}

impl<S: DataSource> BatchCursor<S> {
    pub(crate) fn new(source: S, query: Query, batch_size: usize) -> Self {
        debug_assert!(batch_size > 0, "BUG: zero window size");
        Self {
            source,
            query,
            batch_size,
            retry: RetryPolicy::none(),
            cx: None,
            offset: 0,
            batches_yielded: 0,
            rows_yielded: 0,
            done: false,
            pending: None,
        }
    }

    /// Retries failed windows according to `policy`, on the connection owned by
    /// the cursor.
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn batches_yielded(&self) -> usize {
        self.batches_yielded
    }

    pub fn rows_yielded(&self) -> usize {
        self.rows_yielded
    }

    /// `true` once the cursor has nothing left to report.
    pub fn is_exhausted(&self) -> bool {
        self.done && self.pending.is_none()
    }

    /// Fetches the next window.
    ///
    /// Returns `Ok(None)` once the sequence is exhausted. After an error the
    /// connection is released and the cursor is exhausted.
    pub async fn next_batch(&mut self) -> Result<Option<Batch>> {
        if let Some(err) = self.pending.take() {
            return Err(err);
        }
        if self.done {
            return Ok(None);
        }

        // The connection stays in `self.cx` while a window is in flight, so a
        // cancelled pull leaves it to `Drop`
        let cx = match self.cx.take() {
            Some(cx) => cx,
            None => match self.source.connect().await {
                Ok(cx) => {
                    debug!("cursor connected to `{}`", self.source.name());
                    cx
                }
                Err(err) => {
                    self.done = true;
                    return Err(err.into());
                }
            },
        };
        let cx = self.cx.insert(cx);

        let window = self
            .query
            .windowed(cx.dialect(), self.batch_size, self.offset);

        let rows = match Self::fetch_window(cx, &window, self.retry).await {
            Ok(rows) => rows,
            Err(err) => {
                self.done = true;
                let Some(cx) = self.cx.take() else {
                    return Err(err);
                };
                return Err(match cx.close().await {
                    Ok(()) => err,
                    Err(release) => {
                        warn!(
                            "unable to release cursor connection to `{}` after failure: {}",
                            self.source.name(),
                            release
                        );
                        Error::ReleaseAfterFailure {
                            original: Box::new(err),
                            release,
                        }
                    }
                });
            }
        };

        let fetched = rows.len();
        trace!(
            "window #{} at offset {} returned {} rows",
            self.batches_yielded, self.offset, fetched
        );

        if fetched < self.batch_size {
            self.done = true;
            let released = match self.cx.take() {
                Some(cx) => cx.close().await,
                None => Ok(()),
            };
            debug!(
                "cursor exhausted after {} batches ({} rows)",
                self.batches_yielded + usize::from(fetched > 0),
                self.rows_yielded + fetched
            );

            match (fetched, released) {
                (0, Ok(())) => return Ok(None),
                (0, Err(release)) => return Err(release.into()),
                (_, Err(release)) => self.pending = Some(release.into()),
                (_, Ok(())) => {}
            }
        }

        let batch = Batch::new(self.batches_yielded, self.offset, rows);
        self.batches_yielded += 1;
        self.offset += fetched;
        self.rows_yielded += fetched;

        Ok(Some(batch))
    }

    /// Releases the connection, if still held.
    pub async fn close(mut self) -> Result<()> {
        self.done = true;
        if let Some(cx) = self.cx.take() {
            cx.close().await?;
            debug!("cursor released connection to `{}`", self.source.name());
        }
        match self.pending.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Adapts the cursor to a [`Stream`] of batches.
    pub fn into_stream(self) -> impl Stream<Item = Result<Batch>> {
        futures::stream::try_unfold(self, |mut cursor| async move {
            Ok(cursor.next_batch().await?.map(|batch| (batch, cursor)))
        })
    }

    async fn fetch_window(cx: &mut S::Cx, window: &Query, policy: RetryPolicy) -> Result<RowSet> {
        let mut state = RetryState::new(policy);
        loop {
            state.begin();
            match cx.execute(window).await {
                Ok(rows) => return Ok(rows),
                Err(err) => {
                    let delay = state.fail(err.into())?;
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}

impl<S: DataSource> Drop for BatchCursor<S> {
    fn drop(&mut self) {
        if let Some(cx) = self.cx.take() {
            release_in_background(cx, self.source.name());
        }
    }
}
