use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Result;
use async_trait::async_trait;
use tracing::warn;

use super::app_info::{AppInfo, AppInfoStore};

/// TTL cache in front of the directory store.
///
/// The whole cache is evicted at once when it goes stale; entries carry no
/// individual TTL. Lookups never fail: when the delegate errors, whatever is
/// cached is returned as-is, so metric reporting keeps flowing through
/// directory outages. Missing entries surface downstream as un-enriched tags.
pub struct CachedAppInfoStore {
    delegate: Arc<dyn AppInfoStore>,
    cache_ttl: Duration,
    state: Mutex<CacheState>,
}

struct CacheState {
    entries: HashMap<String, AppInfo>,
    last_cleared: Instant,
}

impl CachedAppInfoStore {
    pub fn new(delegate: Arc<dyn AppInfoStore>, cache_ttl: Duration) -> Self {
        Self {
            delegate,
            cache_ttl,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                last_cleared: Instant::now(),
            }),
        }
    }
}

#[async_trait]
impl AppInfoStore for CachedAppInfoStore {
    async fn lookup(&self, guids: &[String]) -> Result<HashMap<String, AppInfo>> {
        let (hits, misses) = {
            let mut state = self.state.lock().unwrap();
            if state.last_cleared.elapsed() > self.cache_ttl {
                state.entries = HashMap::new();
                state.last_cleared = Instant::now();
            }

            let mut hits = HashMap::new();
            let mut misses = Vec::new();
            for guid in guids {
                match state.entries.get(guid) {
                    Some(info) => {
                        hits.insert(guid.clone(), info.clone());
                    }
                    None => misses.push(guid.clone()),
                }
            }
            (hits, misses)
        };

        if misses.is_empty() {
            return Ok(hits);
        }

        let fresh = match self.delegate.lookup(&misses).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(error = %e, "directory lookup failed, serving cached entries");
                return Ok(hits);
            }
        };

        {
            let mut state = self.state.lock().unwrap();
            for (guid, info) in &fresh {
                state.entries.insert(guid.clone(), info.clone());
            }
        }

        // Delegate values win on key collision.
        let mut merged = hits;
        merged.extend(fresh);
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use anyhow::bail;

    use super::*;

    /// Programmable delegate that records every batch it is asked for.
    struct SpyStore {
        result: Result<HashMap<String, AppInfo>, String>,
        calls: Mutex<Vec<Vec<String>>>,
    }

    impl SpyStore {
        fn returning(result: HashMap<String, AppInfo>) -> Arc<Self> {
            Arc::new(Self {
                result: Ok(result),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn failing(message: &str) -> Arc<Self> {
            Arc::new(Self {
                result: Err(message.to_string()),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Vec<String>> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl AppInfoStore for SpyStore {
        async fn lookup(&self, guids: &[String]) -> Result<HashMap<String, AppInfo>> {
            self.calls.lock().unwrap().push(guids.to_vec());
            match &self.result {
                Ok(map) => Ok(map.clone()),
                Err(message) => bail!("{message}"),
            }
        }
    }

    fn info(name: &str) -> AppInfo {
        AppInfo {
            name: name.to_string(),
            space: "my-space".to_string(),
            org: "my-org".to_string(),
        }
    }

    fn guids(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[tokio::test]
    async fn delegate_results_are_cached_within_the_ttl() {
        let delegate = SpyStore::returning(HashMap::from([("app-1".to_string(), info("my-app"))]));
        let cache = CachedAppInfoStore::new(delegate.clone(), Duration::from_secs(60));

        let first = cache.lookup(&guids(&["app-1"])).await.unwrap();
        let second = cache.lookup(&guids(&["app-1"])).await.unwrap();

        assert_eq!(first.get("app-1"), Some(&info("my-app")));
        assert_eq!(second, first);
        assert_eq!(delegate.calls().len(), 1);
    }

    #[tokio::test]
    async fn only_misses_reach_the_delegate() {
        let delegate = SpyStore::returning(HashMap::from([
            ("app-1".to_string(), info("one")),
            ("app-2".to_string(), info("two")),
        ]));
        let cache = CachedAppInfoStore::new(delegate.clone(), Duration::from_secs(60));

        cache.lookup(&guids(&["app-1"])).await.unwrap();
        let result = cache.lookup(&guids(&["app-1", "app-2"])).await.unwrap();

        assert_eq!(result.len(), 2);
        assert_eq!(delegate.calls(), vec![guids(&["app-1"]), guids(&["app-2"])]);
    }

    #[tokio::test]
    async fn delegate_failure_serves_cached_entries_without_error() {
        let seeded = SpyStore::returning(HashMap::from([("app-1".to_string(), info("my-app"))]));
        let cache = CachedAppInfoStore::new(seeded, Duration::from_secs(60));
        cache.lookup(&guids(&["app-1"])).await.unwrap();

        // Swap in a failing delegate by rebuilding around the same entries:
        // the cache still holds app-1, the delegate refuses app-2.
        let failing = SpyStore::failing("directory down");
        let cache = CachedAppInfoStore {
            delegate: failing,
            cache_ttl: cache.cache_ttl,
            state: cache.state,
        };

        let result = cache.lookup(&guids(&["app-1", "app-2"])).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.get("app-1"), Some(&info("my-app")));
    }

    #[tokio::test]
    async fn delegate_failure_with_a_cold_cache_returns_empty() {
        let cache = CachedAppInfoStore::new(SpyStore::failing("boom"), Duration::from_secs(60));

        let result = cache.lookup(&guids(&["app-1"])).await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn the_whole_cache_is_evicted_after_the_ttl() {
        let delegate = SpyStore::returning(HashMap::from([("app-1".to_string(), info("my-app"))]));
        let cache = CachedAppInfoStore::new(delegate.clone(), Duration::from_millis(20));

        cache.lookup(&guids(&["app-1"])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        cache.lookup(&guids(&["app-1"])).await.unwrap();

        // Expired cache means the same GUID goes back to the delegate.
        assert_eq!(delegate.calls().len(), 2);
    }
}
