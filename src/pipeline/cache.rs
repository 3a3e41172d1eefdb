//! Content-addressed stage cache with TTL and single-flight writes.
//!
//! A key is the SHA-256 of a stage namespace plus the stage's serialized
//! input. Each key owns an async lock: the first caller computes while later
//! callers for the same key wait on the lock and then reuse the stored
//! result, so concurrent runs for one date never both recompute.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::collectors::RawRecord;
use crate::transform::Dataset;

/// SHA-256 content hash used as a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash arbitrary content.
    pub fn from_content(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Hash `input` within `namespace`, so equal inputs of different stages
    /// never collide.
    pub fn for_stage(namespace: &str, input: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(namespace.as_bytes());
        hasher.update([0u8]);
        hasher.update(input.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Key of a fetch for `date` from `source_name`.
    pub fn fetch_key(source_name: &str, date: NaiveDate) -> Self {
        Self::for_stage(&format!("fetch:{}", source_name), &date.to_string())
    }

    /// Key of a transform over `records`.
    ///
    /// # Errors
    ///
    /// Returns the serialization error if a record cannot be encoded.
    pub fn transform_key(records: &[RawRecord]) -> Result<Self, serde_json::Error> {
        Ok(Self::for_stage("transform", &serde_json::to_string(records)?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Entry<V> {
    value: V,
    stored_at: Instant,
}

type Slot<V> = Arc<Mutex<Option<Entry<V>>>>;

/// Hit and miss counters of one cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// TTL-bounded cache of one stage's results.
pub struct StageCache<V> {
    ttl: Duration,
    slots: Mutex<HashMap<ContentHash, Slot<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<V: Clone + Send> StageCache<V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    async fn slot(&self, key: &ContentHash) -> Slot<V> {
        let mut slots = self.slots.lock().await;
        Arc::clone(slots.entry(key.clone()).or_default())
    }

    fn is_live(&self, entry: &Entry<V>) -> bool {
        entry.stored_at.elapsed() < self.ttl
    }

    /// Return the live value for `key`, or run `compute` and store its
    /// result. The boolean is `true` when the value came from the cache.
    ///
    /// Only one computation per key runs at a time. Errors are returned to
    /// the caller that computed and are never cached; a waiting caller then
    /// computes itself.
    ///
    /// # Errors
    ///
    /// Returns whatever `compute` returns.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        key: &ContentHash,
        compute: F,
    ) -> Result<(V, bool), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        let slot = self.slot(key).await;
        let mut guard = slot.lock().await;

        if let Some(entry) = guard.as_ref() {
            if self.is_live(entry) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %key, "Stage cache hit");
                return Ok((entry.value.clone(), true));
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let value = compute().await?;
        *guard = Some(Entry {
            value: value.clone(),
            stored_at: Instant::now(),
        });
        Ok((value, false))
    }

    /// Live value for `key`, if any. Waits for an in-flight computation.
    pub async fn get(&self, key: &ContentHash) -> Option<V> {
        let slot = self.slot(key).await;
        let guard = slot.lock().await;
        guard
            .as_ref()
            .filter(|entry| self.is_live(entry))
            .map(|entry| entry.value.clone())
    }

    pub async fn invalidate(&self, key: &ContentHash) {
        self.slots.lock().await.remove(key);
    }

    /// Drop expired entries that nobody is computing. Returns how many.
    pub async fn purge_expired(&self) -> usize {
        let mut slots = self.slots.lock().await;
        let before = slots.len();
        slots.retain(|_, slot| match slot.try_lock() {
            Ok(guard) => guard.as_ref().is_some_and(|entry| self.is_live(entry)),
            Err(_) => true,
        });
        before - slots.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Caches shared by every run of one orchestrator.
pub struct PipelineCache {
    pub fetch: StageCache<Vec<RawRecord>>,
    pub transform: StageCache<Dataset>,
}

impl PipelineCache {
    pub fn new(fetch_ttl: Duration, transform_ttl: Duration) -> Self {
        Self {
            fetch: StageCache::new(fetch_ttl),
            transform: StageCache::new(transform_ttl),
        }
    }
}

impl Default for PipelineCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600), Duration::from_secs(6 * 3600))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_content_hash_is_stable_and_namespaced() {
        let a = ContentHash::for_stage("fetch:tab", "2024-01-15");
        let b = ContentHash::for_stage("fetch:tab", "2024-01-15");
        let c = ContentHash::for_stage("fetch:other", "2024-01-15");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64);

        let date = NaiveDate::from_ymd_opt(2024, 1, 15).expect("date");
        assert_eq!(ContentHash::fetch_key("tab", date), a);
    }

    #[test]
    fn test_transform_key_depends_on_records() {
        let one = vec![RawRecord::new().with("venue", "Ellerslie")];
        let two = vec![RawRecord::new().with("venue", "Trentham")];
        assert_ne!(
            ContentHash::transform_key(&one).expect("key"),
            ContentHash::transform_key(&two).expect("key")
        );
    }

    #[tokio::test]
    async fn test_second_call_hits() {
        let cache: StageCache<u32> = StageCache::new(Duration::from_secs(60));
        let key = ContentHash::from_content("k");

        let (first, cached) = cache
            .get_or_compute(&key, || async { Ok::<_, String>(7) })
            .await
            .expect("compute");
        assert_eq!((first, cached), (7, false));

        let (second, cached) = cache
            .get_or_compute(&key, || async { Ok::<_, String>(8) })
            .await
            .expect("cached");
        assert_eq!((second, cached), (7, true));
        assert_eq!(cache.stats(), CacheStats { hits: 1, misses: 1 });
    }

    #[tokio::test]
    async fn test_errors_are_not_cached() {
        let cache: StageCache<u32> = StageCache::new(Duration::from_secs(60));
        let key = ContentHash::from_content("k");

        let err = cache
            .get_or_compute(&key, || async { Err::<u32, _>("boom") })
            .await;
        assert!(err.is_err());
        assert!(cache.get(&key).await.is_none());

        let (value, cached) = cache
            .get_or_compute(&key, || async { Ok::<_, &str>(3) })
            .await
            .expect("compute");
        assert_eq!((value, cached), (3, false));
    }

    #[tokio::test]
    async fn test_expired_entries_recompute() {
        let cache: StageCache<u32> = StageCache::new(Duration::from_millis(20));
        let key = ContentHash::from_content("k");
        cache
            .get_or_compute(&key, || async { Ok::<_, String>(1) })
            .await
            .expect("compute");

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.purge_expired().await, 1);

        let (value, cached) = cache
            .get_or_compute(&key, || async { Ok::<_, String>(2) })
            .await
            .expect("recompute");
        assert_eq!((value, cached), (2, false));
    }

    #[tokio::test]
    async fn test_concurrent_callers_compute_once() {
        let cache: Arc<StageCache<u32>> = Arc::new(StageCache::new(Duration::from_secs(60)));
        let calls = Arc::new(AtomicUsize::new(0));
        let key = ContentHash::from_content("shared");

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                let key = key.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_compute(&key, || async {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok::<_, String>(42)
                        })
                        .await
                })
            })
            .collect();

        for result in futures::future::join_all(tasks).await {
            let (value, _) = result.expect("join").expect("compute");
            assert_eq!(value, 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
