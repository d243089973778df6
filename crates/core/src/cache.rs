use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    fetched_at: DateTime<Utc>,
}

/// Key-expiry memoization for upstream API responses.
///
/// Entries are never evicted, only replaced. The lock is held across a fetch,
/// so concurrent callers for a stale key trigger one upstream call and then
/// observe the stored result.
pub struct TtlCache<K, V> {
    ttl: Duration,
    clock: Clock,
    entries: tokio::sync::Mutex<HashMap<K, Entry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self::with_clock(ttl, Arc::new(Utc::now))
    }

    pub fn with_clock(ttl: Duration, clock: Clock) -> Self {
        Self {
            ttl,
            clock,
            entries: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    fn is_fresh(&self, entry: &Entry<V>, now: DateTime<Utc>) -> bool {
        // A clock that moved backwards yields a negative age; treat it as fresh.
        now.signed_duration_since(entry.fetched_at)
            .to_std()
            .map(|age| age < self.ttl)
            .unwrap_or(true)
    }

    /// Returns the cached value while fresh, otherwise runs `fetch` once.
    /// When `fetch` fails and an expired entry exists, the expired value is
    /// served instead of the error.
    pub async fn get_or_fetch<F, Fut>(
        &self,
        key: K,
        force_refresh: bool,
        fetch: F,
    ) -> anyhow::Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<V>>,
    {
        let mut guard = self.entries.lock().await;

        if !force_refresh {
            let now = (self.clock)();
            if let Some(entry) = guard.get(&key).filter(|e| self.is_fresh(e, now)) {
                tracing::debug!(?key, "cache hit");
                return Ok(entry.value.clone());
            }
        }

        match fetch().await {
            Ok(value) => {
                let fetched_at = (self.clock)();
                guard.insert(
                    key,
                    Entry {
                        value: value.clone(),
                        fetched_at,
                    },
                );
                Ok(value)
            }
            Err(err) => match guard.get(&key) {
                Some(stale) => {
                    tracing::warn!(
                        ?key,
                        fetched_at = %stale.fetched_at,
                        error = %err,
                        "refresh failed; serving expired cache entry"
                    );
                    Ok(stale.value.clone())
                }
                None => Err(err),
            },
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Hand-cranked clock for expiry tests.
    #[derive(Clone)]
    pub(crate) struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

    impl ManualClock {
        pub(crate) fn new() -> Self {
            Self(Arc::new(Mutex::new(Utc::now())))
        }

        pub(crate) fn advance(&self, by: Duration) {
            let mut now = self.0.lock().unwrap();
            *now += chrono::Duration::from_std(by).unwrap();
        }

        pub(crate) fn clock(&self) -> Clock {
            let inner = self.0.clone();
            Arc::new(move || *inner.lock().unwrap())
        }
    }

    #[tokio::test]
    async fn second_request_inside_window_is_served_from_cache() {
        let clock = ManualClock::new();
        let cache: TtlCache<&str, Vec<u8>> =
            TtlCache::with_clock(Duration::from_secs(3600), clock.clock());
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        let fetch = || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(b"payload".to_vec())
        };

        let first = cache.get_or_fetch("pools", false, fetch).await.unwrap();
        clock.advance(Duration::from_secs(3599));
        let second = cache.get_or_fetch("pools", false, fetch).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn request_after_expiry_refetches_exactly_once() {
        let clock = ManualClock::new();
        let cache: TtlCache<&str, u32> =
            TtlCache::with_clock(Duration::from_secs(60), clock.clock());
        let counter = AtomicUsize::new(0);
        let calls = &counter;

        let fetch = || async move { Ok(calls.fetch_add(1, Ordering::SeqCst) as u32) };

        assert_eq!(cache.get_or_fetch("k", false, fetch).await.unwrap(), 0);
        clock.advance(Duration::from_secs(61));
        assert_eq!(cache.get_or_fetch("k", false, fetch).await.unwrap(), 1);
        assert_eq!(cache.get_or_fetch("k", false, fetch).await.unwrap(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_refresh_serves_expired_entry() {
        let clock = ManualClock::new();
        let cache: TtlCache<&str, u32> =
            TtlCache::with_clock(Duration::from_secs(60), clock.clock());

        cache.get_or_fetch("k", false, || async { Ok(7) }).await.unwrap();
        clock.advance(Duration::from_secs(120));

        let v = cache
            .get_or_fetch("k", false, || async { Err(anyhow::anyhow!("upstream down")) })
            .await
            .unwrap();
        assert_eq!(v, 7);

        // The expired entry is served but not renewed.
        let v = cache.get_or_fetch("k", false, || async { Ok(9) }).await.unwrap();
        assert_eq!(v, 9);
    }

    #[tokio::test]
    async fn failed_fetch_without_entry_propagates() {
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_secs(60));
        let res = cache
            .get_or_fetch("k", false, || async { Err(anyhow::anyhow!("upstream down")) })
            .await;
        assert!(res.is_err());
    }

    #[tokio::test]
    async fn force_refresh_bypasses_fresh_entry() {
        let cache: TtlCache<&str, u32> = TtlCache::new(Duration::from_secs(60));
        cache.get_or_fetch("k", false, || async { Ok(1) }).await.unwrap();
        let v = cache.get_or_fetch("k", true, || async { Ok(2) }).await.unwrap();
        assert_eq!(v, 2);
        let v = cache.get_or_fetch("k", false, || async { Ok(3) }).await.unwrap();
        assert_eq!(v, 2);
    }
}
