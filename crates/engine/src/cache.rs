//! TTL cache with single-flight deduplication for source fetches.
//!
//! Concurrent requests for the same key while a fetch is in flight share
//! that one fetch. The fetch runs on its own tokio task and stores its own
//! result, so a caller that gives up waiting never loses or corrupts the
//! entry. Failures are handed to every waiter and never stored.

use contextforge_core::SourceError;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, SourceError>>>;

/// How a value was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// This caller started the computation (or the cache was bypassed).
    Miss,
    /// Served from a stored, unexpired entry.
    Hit,
    /// Joined a computation another caller had already started.
    Coalesced,
}

impl CacheStatus {
    /// Whether the caller avoided running the computation itself.
    pub fn is_hit(self) -> bool {
        !matches!(self, Self::Miss)
    }
}

/// Counter snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub entries: usize,
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

struct Flight<V> {
    id: u64,
    future: SharedFetch<V>,
}

struct CacheState<V> {
    entries: HashMap<String, Entry<V>>,
    in_flight: HashMap<String, Flight<V>>,
    next_flight: u64,
}

struct CacheInner<V> {
    state: Mutex<CacheState<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
}

impl<V> CacheInner<V> {
    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Called by the fetch task when it finishes. Only the flight that is
    /// still registered for `key` may store; an invalidate in between
    /// unregisters it.
    fn complete(&self, key: &str, flight_id: u64, ttl: Duration, result: &Result<V, SourceError>)
    where
        V: Clone,
    {
        let mut state = self.lock();
        let current = state.in_flight.get(key).is_some_and(|f| f.id == flight_id);
        if !current {
            debug!(key, "Discarding result of invalidated fetch");
            return;
        }
        state.in_flight.remove(key);
        if let Ok(value) = result {
            state.entries.insert(
                key.to_string(),
                Entry {
                    value: value.clone(),
                    expires_at: Instant::now() + ttl,
                },
            );
        }
    }

    /// Unregister flight `flight_id` for `key` if it is still the current one.
    fn forget(&self, key: &str, flight_id: u64) {
        let mut state = self.lock();
        if state.in_flight.get(key).is_some_and(|f| f.id == flight_id) {
            state.in_flight.remove(key);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}

/// A keyed TTL cache with single-flight fetches.
///
/// Cheap to share: wrap in an `Arc` and hand it to every gateway.
pub struct SourceCache<V> {
    inner: Arc<CacheInner<V>>,
}

impl<V> SourceCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState {
                    entries: HashMap::new(),
                    in_flight: HashMap::new(),
                    next_flight: 0,
                }),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
                coalesced: AtomicU64::new(0),
            }),
        }
    }

    /// Return the cached value for `key`, or compute and cache it for `ttl`.
    ///
    /// A zero `ttl` bypasses the cache entirely.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<V, SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, SourceError>> + Send + 'static,
    {
        self.fetch(key, ttl, compute).await.map(|(v, _)| v)
    }

    /// Like [`get_or_compute`](Self::get_or_compute), also reporting how the
    /// value was obtained.
    pub async fn fetch<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        compute: F,
    ) -> Result<(V, CacheStatus), SourceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, SourceError>> + Send + 'static,
    {
        if ttl.is_zero() {
            self.inner.misses.fetch_add(1, Ordering::Relaxed);
            return compute().await.map(|v| (v, CacheStatus::Miss));
        }

        let (future, status) = {
            let mut state = self.inner.lock();

            let now = Instant::now();
            if let Some(entry) = state.entries.get(key).filter(|e| e.expires_at > now) {
                self.inner.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Cache hit");
                return Ok((entry.value.clone(), CacheStatus::Hit));
            }
            state.entries.remove(key);

            if let Some(flight) = state.in_flight.get(key) {
                self.inner.coalesced.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Joining in-flight fetch");
                (flight.future.clone(), CacheStatus::Coalesced)
            } else {
                self.inner.misses.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Cache miss");

                let flight_id = state.next_flight;
                state.next_flight += 1;

                let work = compute();
                let inner = Arc::clone(&self.inner);
                let owned_key = key.to_string();
                let handle = tokio::spawn(async move {
                    let result = AssertUnwindSafe(work)
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| {
                            warn!(key = %owned_key, "Source fetch panicked");
                            Err(SourceError::failed(&owned_key, panic_message(&*panic)))
                        });
                    inner.complete(&owned_key, flight_id, ttl, &result);
                    result
                });

                let waiter_inner = Arc::clone(&self.inner);
                let waiter_key = key.to_string();
                let future = async move {
                    handle.await.unwrap_or_else(|e| {
                        // Aborted before `complete` ran; unregister so the next caller retries.
                        waiter_inner.forget(&waiter_key, flight_id);
                        Err(SourceError::Cancelled(format!("{waiter_key}: {e}")))
                    })
                }
                .boxed()
                .shared();

                state.in_flight.insert(
                    key.to_string(),
                    Flight {
                        id: flight_id,
                        future: future.clone(),
                    },
                );
                (future, CacheStatus::Miss)
            }
        };

        future.await.map(|v| (v, status))
    }

    /// Drop the entry for `key`, and detach any in-flight fetch so its
    /// result is not stored. Returns whether anything was removed.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut state = self.inner.lock();
        let had_entry = state.entries.remove(key).is_some();
        let had_flight = state.in_flight.remove(key).is_some();
        had_entry || had_flight
    }

    /// Drop every entry and detach every in-flight fetch.
    pub fn clear(&self) {
        let mut state = self.inner.lock();
        state.entries.clear();
        state.in_flight.clear();
    }

    /// Number of unexpired stored entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.inner.hits.load(Ordering::Relaxed),
            misses: self.inner.misses.load(Ordering::Relaxed),
            coalesced: self.inner.coalesced.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl<V> Default for SourceCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counting(
        calls: &Arc<AtomicUsize>,
        value: u32,
    ) -> impl Future<Output = Result<u32, SourceError>> + Send + 'static {
        let calls = Arc::clone(calls);
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        }
    }

    #[tokio::test]
    async fn repeated_calls_within_ttl_compute_once() {
        let cache = SourceCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(60);

        let a = cache.get_or_compute("k", ttl, || counting(&calls, 7)).await.unwrap();
        let (b, status) = cache.fetch("k", ttl, || counting(&calls, 8)).await.unwrap();

        assert_eq!(a, 7);
        assert_eq!(b, 7);
        assert_eq!(status, CacheStatus::Hit);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entries_recompute() {
        let cache = SourceCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(10);

        cache.get_or_compute("k", ttl, || counting(&calls, 1)).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.len(), 0);

        let v = cache.get_or_compute("k", ttl, || counting(&calls, 2)).await.unwrap();
        assert_eq!(v, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn zero_ttl_bypasses_cache() {
        let cache = SourceCache::new();
        let calls = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            cache.get_or_compute("k", Duration::ZERO, || counting(&calls, 1)).await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_calls_share_one_computation() {
        let cache = Arc::new(SourceCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(60);

        let slow = |calls: Arc<AtomicUsize>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, SourceError>(42u32)
        };

        let futures = (0..5).map(|_| {
            let cache = Arc::clone(&cache);
            let calls = Arc::clone(&calls);
            async move { cache.fetch("k", ttl, move || slow(calls)).await }
        });
        let results = futures::future::join_all(futures).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let statuses: Vec<CacheStatus> = results.into_iter().map(|r| r.unwrap().1).collect();
        assert_eq!(statuses.iter().filter(|s| **s == CacheStatus::Miss).count(), 1);
        assert_eq!(statuses.iter().filter(|s| **s == CacheStatus::Coalesced).count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_are_shared_and_not_cached() {
        let cache = Arc::new(SourceCache::<u32>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(60);

        let failing = |calls: Arc<AtomicUsize>| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(SourceError::failed("docs", "backend down"))
        };

        let (a, b) = tokio::join!(
            cache.get_or_compute("k", ttl, {
                let calls = Arc::clone(&calls);
                move || failing(calls)
            }),
            cache.get_or_compute("k", ttl, {
                let calls = Arc::clone(&calls);
                move || failing(calls)
            }),
        );
        assert_eq!(a.unwrap_err(), SourceError::failed("docs", "backend down"));
        assert_eq!(b.unwrap_err(), SourceError::failed("docs", "backend down"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());

        let v = cache.get_or_compute("k", ttl, || counting(&calls, 5)).await.unwrap();
        assert_eq!(v, 5);
    }

    #[tokio::test]
    async fn panicking_compute_does_not_poison_the_key() {
        let cache = SourceCache::<u32>::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(60);

        let err = cache
            .get_or_compute("k", ttl, || async { panic!("upstream bug") })
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Failed { ref reason, .. } if reason.contains("upstream bug")));
        assert!(cache.is_empty());

        let v = cache.get_or_compute("k", ttl, || counting(&calls, 7)).await.unwrap();
        assert_eq!(v, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_caller_does_not_lose_the_result() {
        let cache = SourceCache::new();
        let ttl = Duration::from_secs(60);

        let slow = || async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, SourceError>(9u32)
        };
        let timed_out =
            tokio::time::timeout(Duration::from_millis(10), cache.get_or_compute("k", ttl, slow)).await;
        assert!(timed_out.is_err());

        // The detached task still finishes and stores the value.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let (v, status) = cache
            .fetch("k", ttl, || async { Ok::<_, SourceError>(0u32) })
            .await
            .unwrap();
        assert_eq!(v, 9);
        assert_eq!(status, CacheStatus::Hit);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_during_flight_discards_result() {
        let cache = Arc::new(SourceCache::new());
        let ttl = Duration::from_secs(60);

        let waiter = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                cache
                    .get_or_compute("k", ttl, || async {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok::<_, SourceError>(1u32)
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.invalidate("k"));

        // The original waiter still gets its value...
        assert_eq!(waiter.await.unwrap().unwrap(), 1);
        // ...but it was not stored.
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn clear_empties_the_cache() {
        let cache = SourceCache::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(60);
        cache.get_or_compute("a", ttl, || counting(&calls, 1)).await.unwrap();
        cache.get_or_compute("b", ttl, || counting(&calls, 2)).await.unwrap();
        assert_eq!(cache.len(), 2);

        cache.clear();
        assert_eq!(cache.len(), 0);
        assert!(!cache.invalidate("a"));
    }
}
