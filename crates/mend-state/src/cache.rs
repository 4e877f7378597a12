//! Shared key/value cache with TTL and single-flight
//!
//! Cache entries are advisory: staleness is acceptable and no correctness
//! depends on the cache. When the backing store is unreachable, reads
//! return misses and writes are dropped silently (`NullCache` models this
//! mode); the platform stays correct, only slower.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex as AsyncMutex;

/// Key/value cache with TTL and atomic counters.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch a value; `None` on miss or expiry.
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Store a value with a TTL. Errors are swallowed: a failed cache
    /// write must never fail the caller.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration);

    /// Atomically increment a counter key, creating it at 1 with the given
    /// TTL. Used for rate-limit windows.
    async fn incr(&self, key: &str, ttl: Duration) -> u64;
}

// ---------------------------------------------------------------------------
// MemoryCache
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// In-process cache backed by a `HashMap` with lazy expiry.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: std::sync::Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some(e) if e.expires_at > Instant::now() => Some(e.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    async fn incr(&self, key: &str, ttl: Duration) -> u64 {
        let mut entries = self.entries.lock().unwrap();
        let now = Instant::now();
        let current = match entries.get(key) {
            Some(e) if e.expires_at > now => {
                // Non-counter bytes under this key read as zero.
                let mut buf = [0u8; 8];
                let len = e.value.len().min(8);
                buf[..len].copy_from_slice(&e.value[..len]);
                u64::from_be_bytes(buf)
            }
            _ => 0,
        };
        let next = current + 1;
        // Expiry is pinned at the first increment of the window.
        let expires_at = match entries.get(key) {
            Some(e) if e.expires_at > now => e.expires_at,
            _ => now + ttl,
        };
        entries.insert(
            key.to_string(),
            Entry {
                value: next.to_be_bytes().to_vec(),
                expires_at,
            },
        );
        next
    }
}

// ---------------------------------------------------------------------------
// NullCache
// ---------------------------------------------------------------------------

/// The unreachable-cache failure mode: every read misses, every write is
/// dropped. Installed when `CACHE_URL` is absent or the backend is down.
#[derive(Debug, Default)]
pub struct NullCache;

impl NullCache {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Cache for NullCache {
    async fn get(&self, _key: &str) -> Option<Vec<u8>> {
        None
    }

    async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) {}

    async fn incr(&self, _key: &str, _ttl: Duration) -> u64 {
        // Without a cache there is no shared window; report a count that
        // never trips rate limits.
        1
    }
}

// ---------------------------------------------------------------------------
// CacheHandle — single-flight wrapper
// ---------------------------------------------------------------------------

/// Cache handle adding a `get_or_set` helper whose compute closure runs at
/// most once per key under contention (single-flight).
///
/// Contending callers await the in-flight computation's key lock, then
/// re-check the cache before computing themselves.
#[derive(Clone)]
pub struct CacheHandle {
    inner: Arc<dyn Cache>,
    flights: Arc<AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl CacheHandle {
    pub fn new(inner: Arc<dyn Cache>) -> Self {
        Self {
            inner,
            flights: Arc::new(AsyncMutex::new(HashMap::new())),
        }
    }

    pub fn cache(&self) -> &dyn Cache {
        self.inner.as_ref()
    }

    pub async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.get(key).await
    }

    pub async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        self.inner.set(key, value, ttl).await;
    }

    pub async fn incr(&self, key: &str, ttl: Duration) -> u64 {
        self.inner.incr(key, ttl).await
    }

    /// Fetch from the cache, or compute and store the value.
    ///
    /// Under contention on one key, `compute` runs at most once; other
    /// callers block on the key lock and read the stored result. With a
    /// `NullCache` the stored result is lost, so each flight recomputes —
    /// correct, only slower.
    pub async fn get_or_set<F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Vec<u8>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Vec<u8>>,
    {
        if let Some(hit) = self.inner.get(key).await {
            return hit;
        }

        let key_lock = {
            let mut flights = self.flights.lock().await;
            flights
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let _guard = key_lock.lock().await;

        // A contender may have stored the value while we waited.
        if let Some(hit) = self.inner.get(key).await {
            return hit;
        }

        let value = compute().await;
        self.inner.set(key, value.clone(), ttl).await;

        let mut flights = self.flights.lock().await;
        flights.remove(key);

        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_get_set_roundtrip() {
        let cache = MemoryCache::new();
        cache.set("k", b"v".to_vec(), Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await, Some(b"v".to_vec()));
    }

    #[tokio::test]
    async fn test_expiry() {
        let cache = MemoryCache::new();
        cache.set("k", b"v".to_vec(), Duration::ZERO).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_incr_counts_within_window() {
        let cache = MemoryCache::new();
        assert_eq!(cache.incr("rate", Duration::from_secs(60)).await, 1);
        assert_eq!(cache.incr("rate", Duration::from_secs(60)).await, 2);
        assert_eq!(cache.incr("rate", Duration::from_secs(60)).await, 3);
    }

    #[tokio::test]
    async fn test_null_cache_always_misses() {
        let cache = NullCache::new();
        cache.set("k", b"v".to_vec(), Duration::from_secs(60)).await;
        assert_eq!(cache.get("k").await, None);
    }

    #[tokio::test]
    async fn test_single_flight_computes_once() {
        let handle = CacheHandle::new(Arc::new(MemoryCache::new()));
        let calls = Arc::new(AtomicU32::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let handle = handle.clone();
            let calls = calls.clone();
            tasks.push(tokio::spawn(async move {
                handle
                    .get_or_set("expensive", Duration::from_secs(60), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        b"result".to_vec()
                    })
                    .await
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap(), b"result".to_vec());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1, "compute ran more than once");
    }

    #[tokio::test]
    async fn test_single_flight_with_null_cache_still_returns() {
        let handle = CacheHandle::new(Arc::new(NullCache::new()));
        let out = handle
            .get_or_set("k", Duration::from_secs(60), || async { b"x".to_vec() })
            .await;
        assert_eq!(out, b"x".to_vec());
    }
}
