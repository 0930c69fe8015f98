//! The State Store's bounded, per-entry-TTL, LRU-evicted state cache (spec
//! §4.2), plus a background sweeper that evicts expired entries every five
//! minutes.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::model::TerraformState;

/// Cache sizing/lifetime configuration, named to match spec §6's State
/// Store configuration fields.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_size: usize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_size: 100, ttl: Duration::from_secs(3600) }
    }
}

/// How often the background sweeper runs (spec §4.2: "every 5 minutes").
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

struct Entry {
    state: Arc<TerraformState>,
    expires_at: Instant,
}

/// A bounded cache mapping a state key to its last-known-good parsed
/// state. Capacity is enforced by LRU eviction (access-time ordered); each
/// entry additionally expires after its own TTL regardless of access
/// frequency.
pub struct StateCache {
    inner: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

impl StateCache {
    pub fn new(config: CacheConfig) -> Self {
        let capacity = NonZeroUsize::new(config.max_size.max(1)).expect("max(1) is never zero");
        Self { inner: Mutex::new(LruCache::new(capacity)), ttl: config.ttl }
    }

    /// Returns the cached state for `key`, promoting it as most-recently
    /// used, unless its TTL has lapsed (in which case it is evicted and
    /// `None` is returned).
    pub fn get(&self, key: &str) -> Option<Arc<TerraformState>> {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let expired = matches!(inner.peek(key), Some(entry) if entry.expires_at <= Instant::now());
        if expired {
            inner.pop(key);
            return None;
        }
        inner.get(key).map(|entry| entry.state.clone())
    }

    /// Inserts or replaces the cached state for `key`, resetting its TTL.
    pub fn put(&self, key: String, state: Arc<TerraformState>) {
        let expires_at = Instant::now() + self.ttl;
        self.inner.lock().expect("cache mutex poisoned").put(key, Entry { state, expires_at });
    }

    /// Evicts `key` immediately, e.g. after a successful `update_state`.
    pub fn invalidate(&self, key: &str) {
        self.inner.lock().expect("cache mutex poisoned").pop(key);
    }

    /// Extends `key`'s TTL from now, without altering the cached value or
    /// its LRU position.
    pub fn touch(&self, key: &str) {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        if let Some(entry) = inner.peek_mut(key) {
            entry.expires_at = Instant::now() + self.ttl;
        }
    }

    /// Removes every entry whose TTL has lapsed. Returns the number evicted.
    pub fn sweep_expired(&self) -> usize {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let now = Instant::now();
        let expired_keys: Vec<String> = inner
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired_keys {
            inner.pop(key);
        }
        expired_keys.len()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("cache mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Spawns the background sweeper task described in spec §4.2, modeled on
/// `papyrus_node::main::spawn_storage_metrics_collector`'s
/// `loop { ...; sleep(interval).await }` shape. Runs until the returned
/// handle is dropped or aborted.
pub fn spawn_sweeper(cache: Arc<StateCache>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SWEEP_INTERVAL).await;
            let evicted = cache.sweep_expired();
            if evicted > 0 {
                tracing::debug!(evicted, "state cache sweeper evicted expired entries");
                metrics::increment_counter!(
                    driftmgr_common::metrics::DRIFTMGR_STATE_CACHE_EVICTIONS,
                    evicted as u64
                );
            }
        }
    })
}

#[cfg(test)]
mod cache_test {
    use super::*;

    fn state() -> Arc<TerraformState> {
        Arc::new(TerraformState::new_empty("abcdefgh".into()))
    }

    #[test]
    fn put_then_get_returns_the_same_state() {
        let cache = StateCache::new(CacheConfig { max_size: 10, ttl: Duration::from_secs(60) });
        cache.put("k".into(), state());
        assert!(cache.get("k").is_some());
    }

    #[test]
    fn expired_entry_is_evicted_on_access() {
        let cache = StateCache::new(CacheConfig { max_size: 10, ttl: Duration::from_millis(1) });
        cache.put("k".into(), state());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("k").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn touch_extends_ttl() {
        let cache = StateCache::new(CacheConfig { max_size: 10, ttl: Duration::from_millis(50) });
        cache.put("k".into(), state());
        std::thread::sleep(Duration::from_millis(20));
        cache.touch("k");
        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("k").is_some(), "touch should have reset the TTL window");
    }

    #[test]
    fn invalidate_removes_immediately() {
        let cache = StateCache::new(CacheConfig { max_size: 10, ttl: Duration::from_secs(60) });
        cache.put("k".into(), state());
        cache.invalidate("k");
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn exceeding_max_size_evicts_least_recently_used() {
        let cache = StateCache::new(CacheConfig { max_size: 2, ttl: Duration::from_secs(60) });
        cache.put("a".into(), state());
        cache.put("b".into(), state());
        cache.get("a"); // promote a
        cache.put("c".into(), state());
        assert!(cache.get("b").is_none(), "b should have been the LRU victim");
        assert!(cache.get("a").is_some());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn sweep_expired_counts_evictions() {
        let cache = StateCache::new(CacheConfig { max_size: 10, ttl: Duration::from_millis(1) });
        cache.put("a".into(), state());
        cache.put("b".into(), state());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.sweep_expired(), 2);
    }
}
