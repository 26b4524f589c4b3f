use std::num::NonZeroUsize;
use std::sync::Arc;

use moka::future::{Cache, CacheBuilder};

use crate::types::{Fingerprint, RowSet};

/// Backing store of a [`super::ResultCache`].
pub type Store = Cache<Fingerprint, Arc<RowSet>>;

pub type StoreBuilder = CacheBuilder<Fingerprint, Arc<RowSet>, Store>;

/// Decides which entries leave the cache.
///
/// A policy shapes the store once, when the [`super::ResultCache`] is built.
pub trait EvictionPolicy: Send + Sync {
    fn configure(&self, builder: StoreBuilder) -> StoreBuilder;
}

/// Keeps every entry for the lifetime of the cache.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unbounded;

impl EvictionPolicy for Unbounded {
    fn configure(&self, builder: StoreBuilder) -> StoreBuilder {
        builder
    }
}

/// Keeps at most `capacity` entries, evicting the least recently used.
#[derive(Debug, Clone, Copy)]
pub struct LruEviction {
    capacity: NonZeroUsize,
}

impl LruEviction {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self { capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity.get()
    }
}

impl EvictionPolicy for LruEviction {
    fn configure(&self, builder: StoreBuilder) -> StoreBuilder {
        builder
            .max_capacity(self.capacity.get() as u64)
            .eviction_policy(moka::policy::EvictionPolicy::lru())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repo::testing::users;
    use crate::types::Query;

    fn key(n: i64) -> Fingerprint {
        Query::new("SELECT * FROM user_data WHERE age > ?")
            .bind(n)
            .fingerprint()
    }

    fn build(policy: impl EvictionPolicy) -> Store {
        policy.configure(Cache::builder()).build()
    }

    #[tokio::test]
    async fn lru_evicts_least_recently_used() {
        let store = build(LruEviction::new(NonZeroUsize::new(2).unwrap()));
        let rows = Arc::new(users(1));

        store.insert(key(1), rows.clone()).await;
        store.insert(key(2), rows.clone()).await;
        store.run_pending_tasks().await;

        assert!(store.get(&key(1)).await.is_some());
        store.run_pending_tasks().await;

        store.insert(key(3), rows).await;
        store.run_pending_tasks().await;

        assert_eq!(store.entry_count(), 2);
        assert!(store.get(&key(2)).await.is_none());
        assert!(store.get(&key(1)).await.is_some());
        assert!(store.get(&key(3)).await.is_some());
    }

    #[tokio::test]
    async fn unbounded_keeps_everything() {
        let store = build(Unbounded);
        for n in 0..64 {
            store.insert(key(n), Arc::new(users(1))).await;
        }
        store.run_pending_tasks().await;

        assert_eq!(store.entry_count(), 64);
    }
}
