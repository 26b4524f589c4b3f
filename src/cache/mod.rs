//! Query result cache.
//!
//! Results are keyed on [`Query::fingerprint`], so two queries hit the same
//! entry only when their normalized statements and bound parameters match.
//! A cache is an explicitly constructed value: share it with an [`Arc`] to
//! use it across tasks, build a new one to get a separate scope.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use log::{debug, trace};
use moka::future::Cache;

use crate::error::Result;
use crate::types::{Fingerprint, Query, RowSet};

mod eviction;
pub use eviction::*;

/// Whether a result was served from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
}

impl CacheOutcome {
    pub fn is_hit(&self) -> bool {
        matches!(self, CacheOutcome::Hit)
    }
}

impl fmt::Display for CacheOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheOutcome::Hit => write!(f, "hit"),
            CacheOutcome::Miss => write!(f, "miss"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Cached {
    pub rows: Arc<RowSet>,
    pub outcome: CacheOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct ResultCache {
    entries: Store,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCache")
            .field("hits", &self.hits.load(Ordering::Relaxed))
            .field("misses", &self.misses.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl ResultCache {
    /// An empty, unbounded cache.
    pub fn new() -> Self {
        Self::with_eviction(Unbounded)
    }

    pub fn with_eviction(policy: impl EvictionPolicy + 'static) -> Self {
        Self {
            entries: policy.configure(Cache::builder()).build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Returns the cached result of `query`, or runs `fetch` and stores its
    /// result.
    ///
    /// `fetch` is not invoked on a hit. A failed fetch stores nothing and its
    /// error is returned as is. When two tasks miss the same key concurrently
    /// both fetch and the last one to finish owns the entry.
    pub async fn get_or_fetch<F, Fut>(&self, query: &Query, fetch: F) -> Result<Cached>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<RowSet>>,
    {
        let key = query.fingerprint();

        if let Some(rows) = self.lookup(&key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!("cache hit for `{}` ({} rows)", query, rows.len());
            return Ok(Cached {
                rows,
                outcome: CacheOutcome::Hit,
            });
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!("cache miss for `{}`", query);

        let rows = Arc::new(fetch().await?);
        self.store(key, rows.clone()).await;

        Ok(Cached {
            rows,
            outcome: CacheOutcome::Miss,
        })
    }

    /// Cached result of `query`, if any. Does not touch the hit/miss counters.
    pub async fn get(&self, query: &Query) -> Option<Arc<RowSet>> {
        self.entries.get(&query.fingerprint()).await
    }

    /// Removes the entry of `query`. Returns `true` if there was one.
    pub async fn invalidate(&self, query: &Query) -> bool {
        let key = query.fingerprint();
        let removed = self.entries.remove(&key).await.is_some();
        if removed {
            trace!("invalidated cache entry {}", key);
        }
        removed
    }

    pub async fn clear(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;
    }

    /// Number of live entries, once pending evictions have been applied.
    pub async fn len(&self) -> usize {
        self.entries.run_pending_tasks().await;
        self.entries.entry_count() as usize
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len().await,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    async fn lookup(&self, key: &Fingerprint) -> Option<Arc<RowSet>> {
        self.entries.get(key).await
    }

    async fn store(&self, key: Fingerprint, rows: Arc<RowSet>) {
        trace!("storing cache entry {} ({} rows)", key, rows.len());
        self.entries.insert(key, rows).await;
    }
}
