//! SQLite-backed disk tier.
//!
//! One row per cache key. Payloads are stored as serialized JSON; recency is
//! a monotonically increasing access sequence so LRU order survives restarts.

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::entry::CacheEntry;
use crate::errors::MarketDataError;
use crate::models::{Bar, CacheKey};

type Result<T> = std::result::Result<T, MarketDataError>;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS cache_entries (
        storage_key TEXT PRIMARY KEY,
        cache_key TEXT NOT NULL,
        payload BLOB NOT NULL,
        fetched_at_ms INTEGER NOT NULL,
        ttl_ms INTEGER NOT NULL,
        expires_at_ms INTEGER,
        size_bytes INTEGER NOT NULL,
        last_access INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_cache_entries_last_access
        ON cache_entries (last_access);

    CREATE INDEX IF NOT EXISTS idx_cache_entries_expires_at
        ON cache_entries (expires_at_ms);
";

fn duration_millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

fn byte_count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

/// Raw row before decoding.
struct StoredRow {
    storage_key: String,
    cache_key: String,
    payload: Vec<u8>,
    fetched_at_ms: i64,
    ttl_ms: i64,
    size_bytes: i64,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            storage_key: row.get(0)?,
            cache_key: row.get(1)?,
            payload: row.get(2)?,
            fetched_at_ms: row.get(3)?,
            ttl_ms: row.get(4)?,
            size_bytes: row.get(5)?,
        })
    }

    fn decode(self) -> Result<CacheEntry> {
        let key: CacheKey = serde_json::from_str(&self.cache_key)?;
        let payload: Vec<Bar> = serde_json::from_slice(&self.payload)?;
        let fetched_at = DateTime::<Utc>::from_timestamp_millis(self.fetched_at_ms)
            .ok_or_else(|| {
                MarketDataError::Cache(format!("bad fetch timestamp {}", self.fetched_at_ms))
            })?;

        Ok(CacheEntry {
            key,
            payload: Arc::new(payload),
            fetched_at,
            ttl: Duration::from_millis(u64::try_from(self.ttl_ms).unwrap_or(0)),
            size_bytes: u64::try_from(self.size_bytes).unwrap_or(0),
        })
    }
}

/// Persistent, size-bounded tier.
pub struct DiskTier {
    conn: Mutex<Connection>,
    max_bytes: u64,
    access_seq: AtomicI64,
}

impl DiskTier {
    /// Open (or create) the cache database at `path`.
    pub fn open(path: impl AsRef<Path>, max_bytes: u64) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                MarketDataError::Cache(format!("create {}: {}", parent.display(), e))
            })?;
        }
        debug!("Disk cache: opening {}", path.display());
        Self::init(Connection::open(path)?, max_bytes)
    }

    /// A throwaway database, mostly for tests.
    pub fn open_in_memory(max_bytes: u64) -> Result<Self> {
        Self::init(Connection::open_in_memory()?, max_bytes)
    }

    fn init(conn: Connection, max_bytes: u64) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        let last_seq: i64 = conn.query_row(
            "SELECT COALESCE(MAX(last_access), 0) FROM cache_entries",
            [],
            |row| row.get(0),
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            max_bytes,
            access_seq: AtomicI64::new(last_seq),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("Disk cache mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn next_seq(&self) -> i64 {
        self.access_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Point lookup. Marks the row as most recently used.
    ///
    /// Rows that no longer decode are deleted and reported as a miss.
    pub fn get(&self, storage_key: &str) -> Result<Option<CacheEntry>> {
        let conn = self.lock();
        let row = conn
            .query_row(
                "SELECT storage_key, cache_key, payload, fetched_at_ms, ttl_ms, size_bytes
                 FROM cache_entries WHERE storage_key = ?1",
                params![storage_key],
                StoredRow::from_row,
            )
            .optional()?;

        let Some(row) = row else {
            return Ok(None);
        };

        match row.decode() {
            Ok(entry) => {
                conn.execute(
                    "UPDATE cache_entries SET last_access = ?1 WHERE storage_key = ?2",
                    params![self.next_seq(), storage_key],
                )?;
                Ok(Some(entry))
            }
            Err(e) => {
                warn!("Disk cache: dropping undecodable row {}: {}", storage_key, e);
                conn.execute(
                    "DELETE FROM cache_entries WHERE storage_key = ?1",
                    params![storage_key],
                )?;
                Ok(None)
            }
        }
    }

    /// Mark a row as most recently used without reading it back.
    /// Returns whether the row exists.
    pub fn touch(&self, storage_key: &str) -> Result<bool> {
        let updated = self.lock().execute(
            "UPDATE cache_entries SET last_access = ?1 WHERE storage_key = ?2",
            params![self.next_seq(), storage_key],
        )?;
        Ok(updated > 0)
    }

    /// Insert or replace `entry` with its serialized `payload`.
    ///
    /// Evicts least recently used rows until the new row fits and returns
    /// their storage keys. Fails if the payload alone exceeds the bound.
    pub fn put(&self, entry: &CacheEntry, payload: &[u8]) -> Result<Vec<String>> {
        let storage_key = entry.key.storage_key();
        let size = byte_count(payload.len());
        let max = i64::try_from(self.max_bytes).unwrap_or(i64::MAX);
        if size > max {
            return Err(MarketDataError::Cache(format!(
                "entry {} ({} bytes) exceeds disk cache bound of {} bytes",
                storage_key, size, max
            )));
        }
        let cache_key = serde_json::to_string(&entry.key)?;

        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let replaced: i64 = tx
            .query_row(
                "SELECT size_bytes FROM cache_entries WHERE storage_key = ?1",
                params![storage_key],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);
        let total: i64 = tx.query_row(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM cache_entries",
            [],
            |row| row.get(0),
        )?;

        let mut used = total - replaced;
        let mut evicted = Vec::new();
        if used.saturating_add(size) > max {
            let mut stmt = tx.prepare(
                "SELECT storage_key, size_bytes FROM cache_entries
                 WHERE storage_key <> ?1 ORDER BY last_access ASC",
            )?;
            let candidates = stmt.query_map(params![storage_key], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for candidate in candidates {
                if used.saturating_add(size) <= max {
                    break;
                }
                let (key, bytes) = candidate?;
                used -= bytes;
                evicted.push(key);
            }
        }
        for key in &evicted {
            tx.execute(
                "DELETE FROM cache_entries WHERE storage_key = ?1",
                params![key],
            )?;
        }

        tx.execute(
            "INSERT OR REPLACE INTO cache_entries (
                storage_key, cache_key, payload, fetched_at_ms,
                ttl_ms, expires_at_ms, size_bytes, last_access
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                storage_key,
                cache_key,
                payload,
                entry.fetched_at.timestamp_millis(),
                duration_millis(entry.ttl),
                entry.expires_at().map(|t| t.timestamp_millis()),
                size,
                self.next_seq(),
            ],
        )?;
        tx.commit()?;

        if !evicted.is_empty() {
            debug!(
                "Disk cache: evicted {} entries to fit {}",
                evicted.len(),
                storage_key
            );
        }
        Ok(evicted)
    }

    pub fn remove(&self, storage_key: &str) -> Result<bool> {
        let removed = self.lock().execute(
            "DELETE FROM cache_entries WHERE storage_key = ?1",
            params![storage_key],
        )?;
        Ok(removed > 0)
    }

    /// Delete rows expired at `now` and return their keys.
    pub fn remove_expired(&self, now: DateTime<Utc>) -> Result<Vec<String>> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let now_ms = now.timestamp_millis();

        let expired: Vec<String> = {
            let mut stmt = tx.prepare(
                "SELECT storage_key FROM cache_entries
                 WHERE expires_at_ms IS NOT NULL AND expires_at_ms <= ?1",
            )?;
            let rows = stmt.query_map(params![now_ms], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        tx.execute(
            "DELETE FROM cache_entries
             WHERE expires_at_ms IS NOT NULL AND expires_at_ms <= ?1",
            params![now_ms],
        )?;
        tx.commit()?;

        Ok(expired)
    }

    /// Evict least recently used rows until at least `target_free` bytes are
    /// free (capped at the bound). Returns the evicted keys.
    pub fn evict_lru(&self, target_free: u64) -> Result<Vec<String>> {
        let max = i64::try_from(self.max_bytes).unwrap_or(i64::MAX);
        let target = i64::try_from(target_free).unwrap_or(i64::MAX).min(max);

        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let mut used: i64 = tx.query_row(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM cache_entries",
            [],
            |row| row.get(0),
        )?;

        let mut evicted = Vec::new();
        {
            let mut stmt = tx.prepare(
                "SELECT storage_key, size_bytes FROM cache_entries ORDER BY last_access ASC",
            )?;
            let candidates = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for candidate in candidates {
                if max - used >= target {
                    break;
                }
                let (key, bytes) = candidate?;
                used -= bytes;
                evicted.push(key);
            }
        }
        for key in &evicted {
            tx.execute(
                "DELETE FROM cache_entries WHERE storage_key = ?1",
                params![key],
            )?;
        }
        tx.commit()?;

        Ok(evicted)
    }

    /// Aggregate payload bytes currently stored.
    pub fn total_bytes(&self) -> Result<u64> {
        let total: i64 = self.lock().query_row(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM cache_entries",
            [],
            |row| row.get(0),
        )?;
        Ok(u64::try_from(total).unwrap_or(0))
    }

    pub fn len(&self) -> Result<usize> {
        let count: i64 =
            self.lock()
                .query_row("SELECT COUNT(*) FROM cache_entries", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Storage keys from most to least recently used.
    pub fn keys(&self) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT storage_key FROM cache_entries ORDER BY last_access DESC")?;
        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(keys)
    }

    pub fn clear(&self) -> Result<()> {
        self.lock().execute("DELETE FROM cache_entries", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone};
    use rust_decimal_macros::dec;

    use crate::models::{DatasetType, QueryParams};

    fn entry(symbol: &str, rows: usize, ttl: Duration) -> (CacheEntry, Vec<u8>) {
        let params = QueryParams::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        );
        let bars: Vec<Bar> = (0..rows)
            .map(|i| {
                let ts = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap()
                    + chrono::Duration::days(i as i64);
                Bar::new(ts, dec!(100.25))
            })
            .collect();
        let payload = serde_json::to_vec(&bars).unwrap();
        let entry = CacheEntry {
            key: CacheKey::new(DatasetType::DailyBars, symbol, params).unwrap(),
            payload: Arc::new(bars),
            fetched_at: Utc::now(),
            ttl,
            size_bytes: payload.len() as u64,
        };
        (entry, payload)
    }

    #[test]
    fn test_put_get_round_trip() {
        let disk = DiskTier::open_in_memory(1 << 20).unwrap();
        let (e, payload) = entry("AAPL", 3, Duration::from_secs(3600));
        disk.put(&e, &payload).unwrap();

        let got = disk.get(&e.key.storage_key()).unwrap().unwrap();
        assert_eq!(got.key, e.key);
        assert_eq!(*got.payload, *e.payload);
        assert_eq!(got.ttl, e.ttl);
        assert_eq!(got.fetched_at.timestamp_millis(), e.fetched_at.timestamp_millis());
        assert_eq!(disk.total_bytes().unwrap(), payload.len() as u64);
    }

    #[test]
    fn test_replace_does_not_double_count() {
        let disk = DiskTier::open_in_memory(1 << 20).unwrap();
        let (e, payload) = entry("AAPL", 3, Duration::from_secs(3600));
        disk.put(&e, &payload).unwrap();
        disk.put(&e, &payload).unwrap();

        assert_eq!(disk.len().unwrap(), 1);
        assert_eq!(disk.total_bytes().unwrap(), payload.len() as u64);
    }

    #[test]
    fn test_size_bound_evicts_least_recently_accessed() {
        let (a, pa) = entry("A", 2, Duration::from_secs(3600));
        let (b, pb) = entry("B", 2, Duration::from_secs(3600));
        let (c, pc) = entry("C", 2, Duration::from_secs(3600));
        // Room for exactly two entries
        let disk = DiskTier::open_in_memory((pa.len() + pb.len()) as u64).unwrap();

        disk.put(&a, &pa).unwrap();
        disk.put(&b, &pb).unwrap();
        // Touch A so B is the least recently accessed
        disk.get(&a.key.storage_key()).unwrap();

        let evicted = disk.put(&c, &pc).unwrap();
        assert_eq!(evicted, vec![b.key.storage_key()]);
        assert!(disk.get(&a.key.storage_key()).unwrap().is_some());
        assert!(disk.get(&b.key.storage_key()).unwrap().is_none());
        assert!(disk.total_bytes().unwrap() <= disk.max_bytes());
    }

    #[test]
    fn test_touch_refreshes_recency() {
        let (a, pa) = entry("A", 2, Duration::from_secs(3600));
        let (b, pb) = entry("B", 2, Duration::from_secs(3600));
        let (c, pc) = entry("C", 2, Duration::from_secs(3600));
        let disk = DiskTier::open_in_memory((pa.len() + pb.len()) as u64).unwrap();

        disk.put(&a, &pa).unwrap();
        disk.put(&b, &pb).unwrap();
        assert!(disk.touch(&a.key.storage_key()).unwrap());
        assert!(!disk.touch("missing").unwrap());

        assert_eq!(disk.put(&c, &pc).unwrap(), vec![b.key.storage_key()]);
    }

    #[test]
    fn test_oversized_entry_is_rejected() {
        let (e, payload) = entry("BIG", 10, Duration::from_secs(3600));
        let disk = DiskTier::open_in_memory(16).unwrap();
        assert!(matches!(
            disk.put(&e, &payload),
            Err(MarketDataError::Cache(_))
        ));
        assert!(disk.is_empty().unwrap());
    }

    #[test]
    fn test_remove_expired() {
        let disk = DiskTier::open_in_memory(1 << 20).unwrap();
        let (old, po) = entry("OLD", 1, Duration::ZERO);
        let (new, pn) = entry("NEW", 1, Duration::from_secs(3600));
        disk.put(&old, &po).unwrap();
        disk.put(&new, &pn).unwrap();

        let removed = disk.remove_expired(Utc::now()).unwrap();
        assert_eq!(removed, vec![old.key.storage_key()]);
        assert_eq!(disk.keys().unwrap(), vec![new.key.storage_key()]);
    }

    #[test]
    fn test_evict_lru_frees_target() {
        let (a, pa) = entry("A", 2, Duration::from_secs(3600));
        let (b, pb) = entry("B", 2, Duration::from_secs(3600));
        let disk = DiskTier::open_in_memory((pa.len() + pb.len()) as u64).unwrap();
        disk.put(&a, &pa).unwrap();
        disk.put(&b, &pb).unwrap();

        let evicted = disk.evict_lru(pa.len() as u64).unwrap();
        assert_eq!(evicted, vec![a.key.storage_key()]);
        assert_eq!(disk.len().unwrap(), 1);

        // Already enough room
        assert!(disk.evict_lru(1).unwrap().is_empty());
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.sqlite");
        let (a, pa) = entry("A", 2, Duration::from_secs(3600));
        let (b, pb) = entry("B", 2, Duration::from_secs(3600));

        {
            let disk = DiskTier::open(&path, 1 << 20).unwrap();
            disk.put(&a, &pa).unwrap();
            disk.put(&b, &pb).unwrap();
            disk.get(&a.key.storage_key()).unwrap();
        }

        let disk = DiskTier::open(&path, 1 << 20).unwrap();
        // Recency order is preserved across the reopen
        assert_eq!(
            disk.keys().unwrap(),
            vec![a.key.storage_key(), b.key.storage_key()]
        );
        let (c, pc) = entry("C", 2, Duration::from_secs(3600));
        disk.put(&c, &pc).unwrap();
        assert_eq!(disk.keys().unwrap()[0], c.key.storage_key());
    }

    #[test]
    fn test_undecodable_row_is_dropped() {
        let disk = DiskTier::open_in_memory(1 << 20).unwrap();
        let (e, _) = entry("AAPL", 1, Duration::from_secs(3600));
        disk.put(&e, b"not json").unwrap();

        assert!(disk.get(&e.key.storage_key()).unwrap().is_none());
        assert!(disk.is_empty().unwrap());
    }
}
