use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

#[derive(Clone)]
struct CachedPrompt {
    value: String,
    refreshed_at: Instant,
}

/// Per-tenant cache of the assembled system context.
///
/// Reads are lock-free after initialization; a background task refreshes
/// entries out of band so the hot path never rebuilds an expired prompt
/// itself unless the entry is missing entirely.
pub struct PromptCache {
    entries: DashMap<String, CachedPrompt>,
    ttl: Duration,
}

impl PromptCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn get(&self, tenant: &str) -> Option<String> {
        self.entries.get(tenant).and_then(|entry| {
            if entry.refreshed_at.elapsed() < self.ttl {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    pub fn put(&self, tenant: &str, value: String) {
        self.entries.insert(
            tenant.to_string(),
            CachedPrompt {
                value,
                refreshed_at: Instant::now(),
            },
        );
    }

    /// Fresh cached value, or the result of `build` (which is cached).
    pub fn get_or_build(&self, tenant: &str, build: impl FnOnce() -> String) -> String {
        if let Some(value) = self.get(tenant) {
            return value;
        }
        let value = build();
        self.put(tenant, value.clone());
        value
    }

    /// Spawns the out-of-band refresher. The builder re-renders every known
    /// tenant's prompt on each tick.
    pub fn spawn_refresh<F>(
        self: &Arc<Self>,
        interval: Duration,
        build: F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let tenants: Vec<String> =
                    cache.entries.iter().map(|e| e.key().clone()).collect();
                for tenant in tenants {
                    let value = build(&tenant);
                    cache.put(&tenant, value);
                    debug!(%tenant, "prompt cache entry refreshed");
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_entries_are_misses() {
        let cache = PromptCache::new(Duration::from_millis(10));
        cache.put("t1", "prompt".into());
        assert_eq!(cache.get("t1").as_deref(), Some("prompt"));

        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.get("t1"), None);
    }

    #[test]
    fn get_or_build_populates_once_while_fresh() {
        let cache = PromptCache::new(Duration::from_secs(60));
        let mut builds = 0;
        let value = cache.get_or_build("t1", || {
            builds += 1;
            "built".into()
        });
        assert_eq!(value, "built");
        let value = cache.get_or_build("t1", || {
            builds += 1;
            "rebuilt".into()
        });
        assert_eq!(value, "built");
        assert_eq!(builds, 1);
    }

    #[tokio::test]
    async fn refresher_renews_known_tenants() {
        let cache = Arc::new(PromptCache::new(Duration::from_secs(60)));
        cache.put("t1", "stale".into());
        let handle = cache.spawn_refresh(Duration::from_millis(5), |_| "fresh".into());

        tokio::time::sleep(Duration::from_millis(30)).await;
        handle.abort();
        assert_eq!(cache.get("t1").as_deref(), Some("fresh"));
    }
}
