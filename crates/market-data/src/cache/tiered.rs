//! Memory + disk cache with write-through and lazy promotion.
//!
//! The disk tier is the source of truth. Memory only ever holds entries that
//! are also on disk: writes go to disk first, and anything dropped from disk
//! (eviction, sweep, invalidation) is dropped from memory too.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::config::CacheConfig;
use super::disk::DiskTier;
use super::entry::{CacheEntry, CacheLookup, CacheTier};
use super::memory::MemoryTier;
use crate::errors::MarketDataError;
use crate::models::{Bar, CacheKey, DatasetType};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

/// Point-in-time cache statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub memory_entries: usize,
    pub memory_capacity: usize,
    pub disk_entries: usize,
    pub disk_bytes: u64,
    pub disk_max_bytes: u64,
    pub memory_hits: u64,
    pub disk_hits: u64,
    pub stale_hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub memory_evictions: u64,
    pub disk_evictions: u64,
    pub expired_removed: u64,
}

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    memory_evictions: AtomicU64,
    disk_evictions: AtomicU64,
    expired_removed: AtomicU64,
}

fn bump(counter: &AtomicU64, by: usize) {
    counter.fetch_add(by as u64, Ordering::Relaxed);
}

pub struct TieredCache {
    memory: MemoryTier,
    disk: DiskTier,
    config: CacheConfig,
    /// Serializes every change that touches both tiers.
    write_lock: Mutex<()>,
    counters: Counters,
}

impl TieredCache {
    /// Open a cache persisted at `path`.
    pub fn open(path: impl AsRef<Path>, config: CacheConfig) -> Result<Self, MarketDataError> {
        let disk = DiskTier::open(path, config.disk_max_bytes)?;
        Ok(Self::from_parts(disk, config))
    }

    /// A cache whose disk tier is an in-memory SQLite database.
    pub fn in_memory(config: CacheConfig) -> Result<Self, MarketDataError> {
        let disk = DiskTier::open_in_memory(config.disk_max_bytes)?;
        Ok(Self::from_parts(disk, config))
    }

    fn from_parts(disk: DiskTier, config: CacheConfig) -> Self {
        Self {
            memory: MemoryTier::new(config.memory_max_entries),
            disk,
            config,
            write_lock: Mutex::new(()),
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn ttl_for(&self, dataset: DatasetType) -> Duration {
        self.config.ttl.ttl_for(dataset)
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|poisoned| {
            warn!("Cache write lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Look `key` up in memory, then on disk.
    ///
    /// Fresh disk hits are promoted to memory. Expired entries are returned
    /// as [`CacheLookup::Stale`] until a sweep removes them. Disk errors are
    /// logged and reported as a miss.
    pub fn lookup(&self, key: &CacheKey) -> CacheLookup {
        self.lookup_at(key, Utc::now())
    }

    fn lookup_at(&self, key: &CacheKey, now: DateTime<Utc>) -> CacheLookup {
        let storage_key = key.storage_key();

        if let Some(entry) = self.memory.get(&storage_key) {
            if !entry.is_expired_at(now) {
                // Disk eviction orders by last access, memory hits included
                if let Err(e) = self.disk.touch(&storage_key) {
                    warn!("Cache: recording access to {} failed: {}", storage_key, e);
                }
                bump(&self.counters.memory_hits, 1);
                return CacheLookup::Fresh(entry, CacheTier::Memory);
            }
        }

        let _guard = self.lock_writes();
        let found = match self.disk.get(&storage_key) {
            Ok(found) => found,
            Err(e) => {
                warn!("Cache: disk lookup for {} failed: {}", storage_key, e);
                None
            }
        };

        match found {
            Some(entry) if entry.key == *key => {
                if entry.is_expired_at(now) {
                    self.memory.remove(&storage_key);
                    bump(&self.counters.stale_hits, 1);
                    return CacheLookup::Stale(entry, CacheTier::Disk);
                }
                if self.memory.insert(entry.clone()).is_some() {
                    bump(&self.counters.memory_evictions, 1);
                }
                bump(&self.counters.disk_hits, 1);
                CacheLookup::Fresh(entry, CacheTier::Disk)
            }
            _ => {
                self.memory.remove(&storage_key);
                bump(&self.counters.misses, 1);
                CacheLookup::Miss
            }
        }
    }

    /// Fresh entry for `key`, if any.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.lookup(key) {
            CacheLookup::Fresh(entry, _) => Some(entry),
            CacheLookup::Stale(..) | CacheLookup::Miss => None,
        }
    }

    /// Write-through insert. Replaces any existing entry for `key`.
    pub fn put(
        &self,
        key: CacheKey,
        payload: Arc<Vec<Bar>>,
        ttl: Duration,
    ) -> Result<CacheEntry, MarketDataError> {
        let bytes = serde_json::to_vec(payload.as_slice())?;
        let entry = CacheEntry {
            key,
            payload,
            fetched_at: Utc::now(),
            ttl,
            size_bytes: bytes.len() as u64,
        };

        let _guard = self.lock_writes();
        let evicted = self.disk.put(&entry, &bytes)?;
        for storage_key in &evicted {
            self.memory.remove(storage_key);
        }
        bump(&self.counters.disk_evictions, evicted.len());

        if self.memory.insert(entry.clone()).is_some() {
            bump(&self.counters.memory_evictions, 1);
        }
        bump(&self.counters.writes, 1);
        debug!("Cache: stored {} ({} bytes)", entry.key, entry.size_bytes);

        Ok(entry)
    }

    /// Remove `key` from both tiers. Returns whether anything was removed.
    pub fn invalidate(&self, key: &CacheKey) -> Result<bool, MarketDataError> {
        let storage_key = key.storage_key();
        let _guard = self.lock_writes();
        let in_memory = self.memory.remove(&storage_key);
        let on_disk = self.disk.remove(&storage_key)?;
        if in_memory || on_disk {
            info!("Cache: invalidated {}", storage_key);
        }
        Ok(in_memory || on_disk)
    }

    /// Remove every expired entry from both tiers. Returns the number of
    /// entries removed.
    pub fn evict_expired(&self) -> Result<usize, MarketDataError> {
        self.evict_expired_at(Utc::now())
    }

    fn evict_expired_at(&self, now: DateTime<Utc>) -> Result<usize, MarketDataError> {
        let _guard = self.lock_writes();
        let from_memory = self.memory.remove_expired(now);
        let from_disk = self.disk.remove_expired(now)?;
        for storage_key in &from_disk {
            self.memory.remove(storage_key);
        }

        let removed = from_disk.len().max(from_memory);
        bump(&self.counters.expired_removed, removed);
        if removed > 0 {
            debug!("Cache: swept {} expired entries", removed);
        }
        Ok(removed)
    }

    /// Evict least recently used disk entries (and their memory mirrors)
    /// until `target_free` bytes are available on disk.
    pub fn evict_lru(&self, target_free: u64) -> Result<usize, MarketDataError> {
        let _guard = self.lock_writes();
        let evicted = self.disk.evict_lru(target_free)?;
        for storage_key in &evicted {
            self.memory.remove(storage_key);
        }
        bump(&self.counters.disk_evictions, evicted.len());
        Ok(evicted.len())
    }

    /// Drop everything.
    pub fn clear(&self) -> Result<(), MarketDataError> {
        let _guard = self.lock_writes();
        self.memory.clear();
        self.disk.clear()
    }

    /// Storage keys of every persisted entry, most recently used first.
    pub fn keys(&self) -> Result<Vec<String>, MarketDataError> {
        self.disk.keys()
    }

    pub fn stats(&self) -> Result<CacheStats, MarketDataError> {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        Ok(CacheStats {
            memory_entries: self.memory.len(),
            memory_capacity: self.memory.capacity(),
            disk_entries: self.disk.len()?,
            disk_bytes: self.disk.total_bytes()?,
            disk_max_bytes: self.disk.max_bytes(),
            memory_hits: load(&self.counters.memory_hits),
            disk_hits: load(&self.counters.disk_hits),
            stale_hits: load(&self.counters.stale_hits),
            misses: load(&self.counters.misses),
            writes: load(&self.counters.writes),
            memory_evictions: load(&self.counters.memory_evictions),
            disk_evictions: load(&self.counters.disk_evictions),
            expired_removed: load(&self.counters.expired_removed),
        })
    }

    /// Spawn the periodic expiry sweep on the current tokio runtime.
    pub fn spawn_sweeper(self: Arc<Self>) -> JoinHandle<()> {
        let period = self.config.sweep_interval.max(MIN_SWEEP_INTERVAL);
        tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let cache = Arc::clone(&self);
                match tokio::task::spawn_blocking(move || cache.evict_expired()).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => warn!("Cache: expiry sweep failed: {}", e),
                    Err(e) => warn!("Cache: expiry sweep task failed: {}", e),
                }
            }
        })
    }
}
