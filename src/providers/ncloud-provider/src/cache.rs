//! Bounded TTL cache with single-flight loading for read-only lookups.

use crate::error::CallError;
use chrono::{DateTime, Utc};
use moka::future::Cache as MokaCache;
use moka::policy::EvictionPolicy;
use moka::Expiry;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Operation name plus its normalized arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub operation: &'static str,
    pub args: Vec<String>,
}

impl CacheKey {
    pub fn new(operation: &'static str, args: impl IntoIterator<Item = impl ToString>) -> Self {
        Self {
            operation,
            args: args.into_iter().map(|a| a.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: CacheKey,
    pub value: V,
    pub inserted_at: DateTime<Utc>,
    pub ttl: Duration,
}

/// Expires each entry after its own TTL.
struct EntryTtl;

impl<V> Expiry<CacheKey, Arc<CacheEntry<V>>> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &CacheKey,
        value: &Arc<CacheEntry<V>>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// Entries leave by TTL or, at capacity, least-recently-used first.
///
/// Concurrent [`get_or_compute`](Self::get_or_compute) calls for one key
/// share a single computation; failures are handed to every waiter and are
/// not cached. A caller whose token fires stops waiting at once; if it was
/// the one driving the computation, a remaining waiter takes over.
#[derive(Clone)]
pub struct ResultCache<V: Clone + Send + Sync + 'static> {
    inner: MokaCache<CacheKey, Arc<CacheEntry<V>>>,
}

impl<V: Clone + Send + Sync + 'static> ResultCache<V> {
    pub fn new(capacity: u64) -> Self {
        let inner = MokaCache::builder()
            .max_capacity(capacity)
            .eviction_policy(EvictionPolicy::lru())
            .expire_after(EntryTtl)
            .build();
        Self { inner }
    }

    pub async fn get(&self, key: &CacheKey) -> Option<V> {
        self.inner.get(key).await.map(|entry| entry.value.clone())
    }

    pub async fn get_or_compute<F>(
        &self,
        key: CacheKey,
        ttl: Duration,
        cancel: &CancellationToken,
        compute: F,
    ) -> Result<V, CallError>
    where
        F: Future<Output = Result<V, CallError>>,
    {
        let operation = key.operation;
        let entry_key = key.clone();
        let load = self.inner.try_get_with(key, async move {
            tracing::trace!(operation, "cache miss");
            let value = compute.await?;
            Ok::<_, CallError>(Arc::new(CacheEntry {
                key: entry_key,
                value,
                inserted_at: Utc::now(),
                ttl,
            }))
        });
        let entry = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CallError::Cancelled),
            entry = load => entry.map_err(|err: Arc<CallError>| (*err).clone())?,
        };
        Ok(entry.value.clone())
    }

    pub async fn invalidate_all(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks().await;
    }

    pub async fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks().await;
        self.inner.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn key(query: &str) -> CacheKey {
        CacheKey::new("search", [query])
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_computation() {
        let cache: ResultCache<String> = ResultCache::new(16);
        let cancel = CancellationToken::new();
        let calls = &AtomicU32::new(0);
        let load = || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            Ok("result".to_string())
        };

        let (a, b) = tokio::join!(
            cache.get_or_compute(key("piano"), Duration::from_secs(60), &cancel, load()),
            cache.get_or_compute(key("piano"), Duration::from_secs(60), &cancel, load()),
        );
        assert_eq!(a.unwrap(), "result");
        assert_eq!(b.unwrap(), "result");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let c = cache
            .get_or_compute(key("piano"), Duration::from_secs(60), &cancel, load())
            .await;
        assert_eq!(c.unwrap(), "result");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn entries_expire_after_their_ttl() {
        let cache: ResultCache<u32> = ResultCache::new(16);
        let cancel = CancellationToken::new();
        cache
            .get_or_compute(key("short"), Duration::from_millis(20), &cancel, async { Ok(1) })
            .await
            .unwrap();
        assert_eq!(cache.get(&key("short")).await, Some(1));
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get(&key("short")).await, None);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let cache: ResultCache<u32> = ResultCache::new(16);
        let cancel = CancellationToken::new();
        let err = cache
            .get_or_compute(key("x"), Duration::from_secs(60), &cancel, async {
                Err(CallError::transient("503"))
            })
            .await
            .unwrap_err();
        assert!(err.is_transient());

        let ok = cache
            .get_or_compute(key("x"), Duration::from_secs(60), &cancel, async { Ok(5) })
            .await;
        assert_eq!(ok, Ok(5));
    }

    #[tokio::test]
    async fn capacity_bounds_entry_count() {
        let cache: ResultCache<u32> = ResultCache::new(4);
        let cancel = CancellationToken::new();
        for i in 0..20u32 {
            cache
                .get_or_compute(key(&i.to_string()), Duration::from_secs(60), &cancel, async move {
                    Ok(i)
                })
                .await
                .unwrap();
        }
        assert!(cache.entry_count().await <= 4);
    }

    #[tokio::test]
    async fn cancelled_waiter_returns_while_computation_continues() {
        let cache: ResultCache<String> = ResultCache::new(16);
        let leader_token = CancellationToken::new();
        let waiter_token = CancellationToken::new();
        let calls = &AtomicU32::new(0);
        let load = || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok("shared".to_string())
        };

        let leader = cache.get_or_compute(key("slow"), Duration::from_secs(60), &leader_token, load());
        let waiter = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let started = Instant::now();
            let result = cache
                .get_or_compute(key("slow"), Duration::from_secs(60), &waiter_token, load())
                .await;
            (result, started.elapsed())
        };
        let trigger = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            waiter_token.cancel();
        };
        let (leader, (waited, elapsed), _) = tokio::join!(leader, waiter, trigger);

        assert_eq!(waited, Err(CallError::Cancelled));
        assert!(elapsed < Duration::from_millis(200));
        assert_eq!(leader.unwrap(), "shared");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn keys_differ_by_arguments() {
        assert_ne!(
            CacheKey::new("album", ["1"]),
            CacheKey::new("artist", ["1"])
        );
        assert_eq!(CacheKey::new("album", [1]), CacheKey::new("album", ["1"]));
    }
}
