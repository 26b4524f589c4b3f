use std::sync::Arc;

use log::trace;

use crate::cache::{CacheOutcome, ResultCache};
use crate::cursor::{self, BatchCursor, ColumnStream, RowStream};
use crate::error::{AggregateFetchError, ConfigurationError, Result};
use crate::fetch::{FetchCoordinator, FetchOp};
use crate::params::Config;
use crate::repo::{Connection, DataSource, with_connection};
use crate::retry::{RetryPolicy, with_retry};
use crate::types::{Query, RowSet};

/// Rows returned by [`FacadeFetch::fetch`].
#[derive(Debug, Clone)]
pub struct Fetched {
    pub rows: Arc<RowSet>,
    /// `None` when the facade has no cache attached.
    pub cache: Option<CacheOutcome>,
}

/// Facade used to read data from a [`DataSource`].
///
/// A full fetch goes through the optional result cache, then the retry
/// executor, then a connection scope. Clones share the source and the cache.
pub struct FacadeFetch<S: DataSource> {
    source: Arc<S>,
    config: Config,
    retry: RetryPolicy,
    cache: Option<Arc<ResultCache>>,
    coordinator: FetchCoordinator,
}

impl<S: DataSource> Clone for FacadeFetch<S> {
    fn clone(&self) -> Self {
        Self {
            source: self.source.clone(),
            config: self.config.clone(),
            retry: self.retry,
            cache: self.cache.clone(),
            coordinator: self.coordinator.clone(),
        }
    }
}

impl<S: DataSource> FacadeFetch<S> {
    pub fn new(source: S, config: &Config) -> Self {
        Self::from_shared(Arc::new(source), config)
    }

    pub fn from_shared(source: Arc<S>, config: &Config) -> Self {
        Self {
            source,
            config: config.clone(),
            retry: RetryPolicy::from(config),
            cache: None,
            coordinator: FetchCoordinator::default(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Bounds the number of queries [`FacadeFetch::fetch_many`] runs at once.
    pub fn with_max_concurrent_fetches(mut self, max: usize) -> Result<Self, ConfigurationError> {
        self.coordinator = FetchCoordinator::new(max)?;
        Ok(self)
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn cache(&self) -> Option<&Arc<ResultCache>> {
        self.cache.as_ref()
    }

    /// Materializes the full result of `query`.
    pub async fn fetch_all(&self, query: &Query) -> Result<Arc<RowSet>> {
        Ok(self.fetch(query).await?.rows)
    }

    /// Like [`FacadeFetch::fetch_all`], also reporting whether the cache
    /// served the result.
    pub async fn fetch(&self, query: &Query) -> Result<Fetched> {
        match &self.cache {
            Some(cache) => {
                let cached = cache
                    .get_or_fetch(query, || self.fetch_uncached(query))
                    .await?;
                Ok(Fetched {
                    rows: cached.rows,
                    cache: Some(cached.outcome),
                })
            }
            None => Ok(Fetched {
                rows: Arc::new(self.fetch_uncached(query).await?),
                cache: None,
            }),
        }
    }

    /// Executes `query` bypassing the cache. Every attempt runs on a freshly
    /// acquired connection.
    pub async fn fetch_uncached(&self, query: &Query) -> Result<RowSet> {
        trace!("fetching `{}` from `{}`", query, self.source.name());

        let source = self.source.as_ref();
        with_retry(&self.retry, || {
            let query = query.clone();
            with_connection(source, move |cx| {
                Box::pin(async move { Ok(cx.execute(&query).await?) })
            })
        })
        .await
    }

    /// One offset/limit page of `query`, fetched on its own connection. Pages
    /// bypass the cache.
    pub async fn fetch_page(&self, query: &Query, page_size: usize, offset: usize) -> Result<RowSet> {
        if page_size == 0 {
            return Err(ConfigurationError::ZeroBatchSize.into());
        }

        let source = self.source.as_ref();
        with_retry(&self.retry, || {
            let query = query.clone();
            with_connection(source, move |cx| {
                Box::pin(async move {
                    let page = query.windowed(cx.dialect(), page_size, offset);
                    Ok(cx.execute(&page).await?)
                })
            })
        })
        .await
    }

    /// Fetches every query concurrently, results in input order.
    pub async fn fetch_many(
        &self,
        queries: Vec<Query>,
    ) -> Result<Vec<Arc<RowSet>>, AggregateFetchError<Arc<RowSet>>> {
        let ops = queries
            .into_iter()
            .map(|query| {
                let facade = self.clone();
                FetchOp::new(query.to_string(), async move { facade.fetch_all(&query).await })
            })
            .collect();

        self.coordinator.run(ops).await
    }

    /// Lazy batches of `query` using the configured batch size and retry policy.
    pub fn stream_batches(&self, query: Query) -> BatchCursor<Arc<S>> {
        // `Config` never holds a zero batch size
        BatchCursor::new(self.source.clone(), query, self.config.batch_size()).with_retry(self.retry)
    }

    /// Lazy rows of `query`, read one window of the configured size at a time.
    pub fn stream_rows(&self, query: Query) -> RowStream<Arc<S>> {
        self.stream_batches(query).into_rows()
    }

    /// Lazy values of `column` in the result of `query`, one row per window.
    pub fn stream_column(&self, query: &Query, column: &str) -> ColumnStream<Arc<S>> {
        cursor::stream_column(self.source.clone(), query, column).with_retry(self.retry)
    }
}
