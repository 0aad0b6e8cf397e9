//! C2 — Hybrid Cache: two LRU maps with TTL over queue metadata and item
//! lists, write-through or write-back, fixed per-instance (the strategy
//! lives here and is immutable after construction — see `SPEC_FULL.md`
//! §9's resolution of the `cache.config` vs `cacheConfig` ambiguity).

pub mod stats;

use crate::config::CacheStrategy;
use crate::error::{ErrorContext, QueueError, Result};
use crate::model::{Item, Queue};
use crate::storage::{keys, StorageAdapter};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stats::{CacheStats, CacheStatsSnapshot};

#[derive(Clone)]
struct Cached<T> {
    value: T,
    inserted_at: Instant,
    dirty: bool,
}

#[derive(Hash, Eq, PartialEq, Clone, Debug)]
enum WriteKind {
    QueueMeta,
    Items,
}

pub struct HybridCache {
    strategy: CacheStrategy,
    ttl: Duration,
    storage: Arc<StorageAdapter>,
    queue_cache: Mutex<LruCache<String, Cached<Queue>>>,
    items_cache: Mutex<LruCache<String, Cached<Vec<Item>>>>,
    pending_writes: Mutex<HashSet<(WriteKind, String)>>,
    stats: CacheStats,
}

impl HybridCache {
    pub fn new(strategy: CacheStrategy, max_size: usize, ttl: Duration, storage: Arc<StorageAdapter>) -> Self {
        let cap = NonZeroUsize::new(max_size.max(1)).unwrap();
        Self {
            strategy,
            ttl,
            storage,
            queue_cache: Mutex::new(LruCache::new(cap)),
            items_cache: Mutex::new(LruCache::new(cap)),
            pending_writes: Mutex::new(HashSet::new()),
            stats: CacheStats::default(),
        }
    }

    pub fn strategy(&self) -> CacheStrategy {
        self.strategy
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    fn is_fresh(&self, inserted_at: Instant) -> bool {
        inserted_at.elapsed() < self.ttl
    }

    // -- queue metadata ----------------------------------------------------

    pub fn get_queue(&self, queue_id: &str) -> Option<Queue> {
        let mut cache = self.queue_cache.lock();
        if let Some(entry) = cache.get(queue_id) {
            if self.is_fresh(entry.inserted_at) {
                self.stats.record_hit();
                return Some(entry.value.clone());
            }
            cache.pop(queue_id);
        }
        self.stats.record_miss();
        None
    }

    /// Inserts/refreshes a queue metadata entry. Under write-back this marks
    /// the entry dirty and schedules it for the background flusher; under
    /// write-through the caller is expected to have already written through
    /// to Redis, so the entry is cached clean.
    pub fn put_queue(&self, queue_id: &str, queue: Queue, mark_dirty: bool) {
        self.stats.record_write();
        let evicted = {
            let mut cache = self.queue_cache.lock();
            cache.push(
                queue_id.to_string(),
                Cached {
                    value: queue,
                    inserted_at: Instant::now(),
                    dirty: mark_dirty,
                },
            )
        };
        if mark_dirty {
            self.pending_writes
                .lock()
                .insert((WriteKind::QueueMeta, queue_id.to_string()));
        }
        if let Some((evicted_id, entry)) = evicted {
            if entry.dirty && evicted_id != queue_id {
                self.stats.record_eviction();
                self.flush_queue_sync(&evicted_id, &entry.value);
            }
        }
    }

    pub fn invalidate_queue(&self, queue_id: &str) {
        self.queue_cache.lock().pop(queue_id);
        self.pending_writes
            .lock()
            .remove(&(WriteKind::QueueMeta, queue_id.to_string()));
    }

    fn flush_queue_sync(&self, queue_id: &str, queue: &Queue) {
        let storage = self.storage.clone();
        let queue = queue.clone();
        let queue_id = queue_id.to_string();
        // Evicting a dirty write-back entry must flush before returning, so
        // this blocks on the write rather than spawning it off.
        let handle = tokio::runtime::Handle::try_current();
        if let Ok(handle) = handle {
            tokio::task::block_in_place(|| {
                handle.block_on(async move {
                    let fields = crate::queue::encode_queue_hash(&queue);
                    let _ = storage.hset_many(&keys::meta(&queue_id), &fields).await;
                })
            });
        }
        self.stats.record_sync();
    }

    // -- item lists ----------------------------------------------------------

    pub fn get_items(&self, queue_id: &str) -> Option<Vec<Item>> {
        let mut cache = self.items_cache.lock();
        if let Some(entry) = cache.get(queue_id) {
            if self.is_fresh(entry.inserted_at) {
                self.stats.record_hit();
                return Some(entry.value.clone());
            }
            cache.pop(queue_id);
        }
        self.stats.record_miss();
        None
    }

    pub fn put_items(&self, queue_id: &str, items: Vec<Item>, mark_dirty: bool) {
        self.stats.record_write();
        let evicted = {
            let mut cache = self.items_cache.lock();
            cache.push(
                queue_id.to_string(),
                Cached {
                    value: items,
                    inserted_at: Instant::now(),
                    dirty: mark_dirty,
                },
            )
        };
        if mark_dirty {
            self.pending_writes
                .lock()
                .insert((WriteKind::Items, queue_id.to_string()));
        }
        if let Some((evicted_id, entry)) = evicted {
            if entry.dirty && evicted_id != queue_id {
                self.stats.record_eviction();
                self.flush_items_sync(&evicted_id, &entry.value);
            }
        }
    }

    pub fn invalidate_items(&self, queue_id: &str) {
        self.items_cache.lock().pop(queue_id);
        self.pending_writes
            .lock()
            .remove(&(WriteKind::Items, queue_id.to_string()));
    }

    /// Cached item count, recomputed from the cached mirror when present.
    pub fn cached_item_count(&self, queue_id: &str) -> Option<u64> {
        self.get_items(queue_id).map(|items| items.len() as u64)
    }

    fn flush_items_sync(&self, queue_id: &str, items: &[Item]) {
        let storage = self.storage.clone();
        let bodies: Vec<String> = items
            .iter()
            .filter_map(|i| serde_json::to_string(i).ok())
            .collect();
        let queue_id_owned = queue_id.to_string();
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            tokio::task::block_in_place(|| {
                handle.block_on(async move {
                    let _ = storage.replace_list(&keys::items(&queue_id_owned), &bodies).await;
                })
            });
        }
        self.stats.record_sync();
    }

    // -- write-back flusher --------------------------------------------------

    /// Called periodically by the broker's flusher task. Writes every
    /// pending entry out in one sweep.
    pub async fn flush_pending(&self) -> Result<()> {
        let pending: Vec<(WriteKind, String)> = {
            let mut guard = self.pending_writes.lock();
            guard.drain().collect()
        };
        for (kind, queue_id) in pending {
            match kind {
                WriteKind::QueueMeta => {
                    let queue = self.queue_cache.lock().peek(&queue_id).map(|e| e.value.clone());
                    if let Some(queue) = queue {
                        let fields = crate::queue::encode_queue_hash(&queue);
                        self.storage.hset_many(&keys::meta(&queue_id), &fields).await?;
                        if let Some(entry) = self.queue_cache.lock().get_mut(&queue_id) {
                            entry.dirty = false;
                        }
                    }
                }
                WriteKind::Items => {
                    let items = self.items_cache.lock().peek(&queue_id).map(|e| e.value.clone());
                    if let Some(items) = items {
                        let bodies: Vec<String> = items
                            .iter()
                            .filter_map(|i| serde_json::to_string(i).ok())
                            .collect();
                        self.storage.replace_list(&keys::items(&queue_id), &bodies).await?;
                        if let Some(entry) = self.items_cache.lock().get_mut(&queue_id) {
                            entry.dirty = false;
                        }
                    }
                }
            }
            self.stats.record_sync();
        }
        Ok(())
    }

    /// Drains all pending writes, used by `close()` to flush before
    /// disconnecting.
    pub async fn drain(&self, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.flush_pending())
            .await
            .map_err(|_| QueueError::timeout(ErrorContext::new("cache_drain"), timeout.as_millis() as u64))?
    }

    pub fn pending_count(&self) -> usize {
        self.pending_writes.lock().len()
    }
}
