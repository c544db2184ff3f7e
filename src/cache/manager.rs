// Cache manager.
// Owns the bounded memory tier and mediates every persistent repositories write.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::Result;
use crate::store::{AnalyticsEvent, AnalyticsRecord, Store};

use super::CacheEntry;

/// Memory tier: entries plus their insertion order.
///
/// Eviction is oldest-inserted-first, not LRU; re-inserting a language keeps
/// its original position, matching an insertion-ordered map.
#[derive(Default)]
struct MemoryCache {
    entries: HashMap<String, CacheEntry>,
    order: VecDeque<String>,
}

/// Two-tier cache: bounded memory map in front of the persistent store.
pub struct CacheManager {
    store: Arc<dyn Store>,
    memory: Mutex<MemoryCache>,
    max_size: usize,
    ttl: Duration,
}

impl CacheManager {
    pub fn new(store: Arc<dyn Store>, config: &Config) -> Self {
        Self {
            store,
            memory: Mutex::new(MemoryCache::default()),
            max_size: config.max_cache_size,
            ttl: config.cache_duration,
        }
    }

    /// Memory lookup only; the persistent tier is consulted explicitly via
    /// [`CacheManager::load_persistent`].
    pub fn get(&self, language: &str) -> Option<CacheEntry> {
        self.memory
            .lock()
            .expect("cache lock poisoned")
            .entries
            .get(language)
            .cloned()
    }

    /// Read-through to the persistent tier (etag lookup at request build time,
    /// language-switch warm-up).
    pub fn load_persistent(&self, language: &str) -> Result<Option<CacheEntry>> {
        self.store.get_repository(language)
    }

    /// Write an entry through both tiers.
    ///
    /// The memory tier is updated first, then the store; a store failure
    /// propagates since a silently missed write-through would serve stale data
    /// indefinitely. Eviction runs after a successful insert and touches
    /// memory only.
    pub fn put(&self, entry: CacheEntry) -> Result<()> {
        let language = entry.language.clone();

        {
            let mut memory = self.memory.lock().expect("cache lock poisoned");
            if !memory.entries.contains_key(&language) {
                memory.order.push_back(language.clone());
            }
            memory.entries.insert(language.clone(), entry.clone());
        }

        self.store.put_repository(&entry)?;

        let size = {
            let mut memory = self.memory.lock().expect("cache lock poisoned");
            while memory.entries.len() > self.max_size {
                if let Some(oldest) = memory.order.pop_front() {
                    memory.entries.remove(&oldest);
                    debug!(language = %oldest, "evicted oldest memory cache entry");
                } else {
                    break;
                }
            }
            memory.entries.len()
        };

        self.record_analytics(AnalyticsEvent::CacheUpdate {
            language,
            cache_size: size,
        });
        Ok(())
    }

    /// Whether a timestamp is older than the configured TTL.
    pub fn is_expired(&self, timestamp: DateTime<Utc>) -> bool {
        let age = Utc::now()
            .signed_duration_since(timestamp)
            .to_std()
            .unwrap_or(Duration::MAX);
        age > self.ttl
    }

    /// Number of languages currently in the memory tier.
    pub fn len(&self) -> usize {
        self.memory
            .lock()
            .expect("cache lock poisoned")
            .entries
            .len()
    }

    /// Drop expired entries from both tiers.
    ///
    /// Best-effort: store errors are logged, never propagated. Returns the
    /// expired languages so the caller can refresh the one on screen.
    pub fn sweep_expired(&self) -> Vec<String> {
        let persisted = match self.store.all_repositories() {
            Ok(rows) => rows,
            Err(err) => {
                warn!(%err, "cache sweep: failed to enumerate persisted entries");
                return Vec::new();
            }
        };

        let expired: Vec<String> = persisted
            .iter()
            .filter(|entry| self.is_expired(entry.timestamp))
            .map(|entry| entry.language.clone())
            .collect();

        if expired.is_empty() {
            return expired;
        }

        {
            let mut memory = self.memory.lock().expect("cache lock poisoned");
            let MemoryCache { entries, order } = &mut *memory;
            for language in &expired {
                entries.remove(language);
            }
            order.retain(|language| entries.contains_key(language));
        }

        for language in &expired {
            if let Err(err) = self.store.delete_repository(language) {
                warn!(%language, %err, "cache sweep: failed to delete expired row");
            }
        }

        debug!(count = expired.len(), "expired cache entries swept");
        self.record_analytics(AnalyticsEvent::CacheCleanup {
            expired_entries: expired.len(),
            languages: expired.clone(),
        });

        expired
    }

    fn record_analytics(&self, event: AnalyticsEvent) {
        if let Err(err) = self.store.append_analytics(&AnalyticsRecord::now(event)) {
            warn!(%err, "failed to append analytics record");
        }
    }
}
