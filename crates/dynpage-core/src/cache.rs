//! Expiring key-value cache primitive.
//!
//! A small concurrent cache with a fixed time-to-live and a periodic purge
//! sweep. It is used twice in the runtime: for compiled bytecode and for
//! static-file existence checks.
//!
//! Eviction is always correct: a missing entry just means the caller
//! recomputes (slower, never wrong).

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tracing::trace;

struct Entry<V> {
    value: V,
    expires_at: Instant,
}

/// Concurrent cache with fixed entry lifetime and periodic purge.
pub struct ExpiringCache<V> {
    entries: DashMap<String, Entry<V>>,
    ttl: Duration,
    purge_interval: Duration,
}

impl<V: Clone + Send + Sync + 'static> ExpiringCache<V> {
    /// Create a cache with the given entry lifetime and purge interval.
    pub fn new(ttl: Duration, purge_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            ttl,
            purge_interval,
        })
    }

    /// Look up a live entry.
    ///
    /// Expired entries are treated as absent (and dropped eagerly).
    pub fn get(&self, key: &str) -> Option<V> {
        let hit = self.entries.get(key).and_then(|entry| {
            if entry.expires_at > Instant::now() {
                Some(entry.value.clone())
            } else {
                None
            }
        });

        if hit.is_none() {
            self.entries
                .remove_if(key, |_, entry| entry.expires_at <= Instant::now());
        }

        hit
    }

    /// Insert a value with the configured time-to-live.
    pub fn insert(&self, key: impl Into<String>, value: V) {
        self.entries.insert(
            key.into(),
            Entry {
                value,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }

    /// Remove all expired entries.
    pub fn purge(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }

    /// Number of entries currently stored (live or awaiting purge).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Spawn the periodic purge sweep for this cache.
    ///
    /// The task holds only a weak reference and exits once the cache is
    /// dropped, so teardown needs no explicit signal.
    pub fn start_purge(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let interval = self.purge_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                cache.purge();
                trace!(entries = cache.len(), "Cache purge sweep");
            }
        })
    }
}

impl<V> std::fmt::Debug for ExpiringCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpiringCache")
            .field("entries", &self.entries.len())
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}
