use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use tracing::debug;

/// In-memory read cache keyed by query. Entries live until invalidated.
///
/// A poisoned lock is treated as a miss, so the cache can only make reads
/// slower, never wrong.
pub struct QueryCache<K, V> {
    entries: Arc<Mutex<HashMap<K, V>>>,
}

impl<K, V> Clone for QueryCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<K, V> Default for QueryCache<K, V> {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<K, V> QueryCache<K, V>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.entries.lock().ok()?.get(key).cloned()
    }

    pub fn put(&self, key: K, value: V) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, value);
        }
    }

    pub fn invalidate(&self, key: &K) {
        if let Ok(mut entries) = self.entries.lock() {
            if entries.remove(key).is_some() {
                debug!("Invalidated cached query {:?}", key);
            }
        }
    }

    pub fn invalidate_all(&self) {
        match self.entries.lock() {
            Ok(mut entries) => entries.clear(),
            Err(e) => {
                e.into_inner().clear();
                self.entries.clear_poison();
            }
        }
    }

    /// The cached value for `key`, or the result of `fetch`, which is cached on success.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: K, fetch: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if let Some(hit) = self.get(&key) {
            return Ok(hit);
        }
        let value = fetch().await?;
        self.put(key, value.clone());
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetches_once_until_invalidated() {
        let cache: QueryCache<&str, u32> = QueryCache::new();
        let mut calls = 0;

        for _ in 0..3 {
            let v = cache
                .get_or_fetch("bookings", || {
                    calls += 1;
                    async { Ok::<_, ()>(7) }
                })
                .await
                .unwrap();
            assert_eq!(v, 7);
        }
        assert_eq!(calls, 1);

        cache.invalidate(&"bookings");
        cache.get_or_fetch("bookings", || async { Ok::<_, ()>(8) }).await.unwrap();
        assert_eq!(cache.get(&"bookings"), Some(8));
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache: QueryCache<u8, u8> = QueryCache::new();
        let err = cache.get_or_fetch(1, || async { Err::<u8, _>("offline") }).await;
        assert_eq!(err, Err("offline"));
        assert!(cache.get(&1).is_none());
    }

    #[test]
    fn invalidate_all_clears_everything() {
        let cache = QueryCache::new();
        cache.put(1, "a");
        cache.put(2, "b");
        cache.invalidate_all();
        assert!(cache.get(&1).is_none());
        assert!(cache.get(&2).is_none());
    }
}
