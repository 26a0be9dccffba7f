//! Trade record cache with sliding expiration.
//!
//! An entry stays valid while it keeps being read: every hit resets its
//! clock. Entries not read for longer than the expiry window are evicted,
//! lazily on `get` and in bulk by `sweep` (driven periodically by the infra
//! sweeper).
//!
//! A miss is not an error; callers fall back to the persistence gateway.
//!
//! Time is injected via `_at` suffixed methods for deterministic testing.
//! Production callers use the variants without the suffix.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::record::TradeRecord;

/// Idle time after which an entry is stale.
pub const DEFAULT_EXPIRY: Duration = Duration::from_secs(30 * 60);

/// Period of the background sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
struct CacheEntry {
    record: TradeRecord,
    last_access: Instant,
}

#[derive(Debug)]
pub struct TradeCache {
    entries: Mutex<HashMap<u64, CacheEntry>>,
    expiry: Duration,
    hits_total: AtomicU64,
    misses_total: AtomicU64,
    expired_total: AtomicU64,
}

impl Default for TradeCache {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRY)
    }
}

impl TradeCache {
    pub fn new(expiry: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            expiry,
            hits_total: AtomicU64::new(0),
            misses_total: AtomicU64::new(0),
            expired_total: AtomicU64::new(0),
        }
    }

    pub fn expiry(&self) -> Duration {
        self.expiry
    }

    /// Insert or overwrite, stamping the current time as last access.
    pub fn put(&self, record: TradeRecord) {
        self.put_at(record, Instant::now());
    }

    pub fn put_at(&self, record: TradeRecord, now: Instant) {
        self.lock().insert(
            record.trade_id(),
            CacheEntry {
                record,
                last_access: now,
            },
        );
    }

    /// A copy of the cached record, refreshing its clock, or `None` on a miss.
    ///
    /// A stale entry is evicted and reported as a miss.
    pub fn get(&self, trade_id: u64) -> Option<TradeRecord> {
        self.get_at(trade_id, Instant::now())
    }

    pub fn get_at(&self, trade_id: u64, now: Instant) -> Option<TradeRecord> {
        let mut entries = self.lock();
        let Some(entry) = entries.get_mut(&trade_id) else {
            self.misses_total.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        // Saturates to zero if `now` predates the last access.
        if now.saturating_duration_since(entry.last_access) > self.expiry {
            entries.remove(&trade_id);
            self.expired_total.fetch_add(1, Ordering::Relaxed);
            self.misses_total.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("trade cache: evicted stale trade {trade_id} on read");
            return None;
        }

        entry.last_access = entry.last_access.max(now);
        self.hits_total.fetch_add(1, Ordering::Relaxed);
        Some(entry.record.clone())
    }

    pub fn remove(&self, trade_id: u64) -> bool {
        self.lock().remove(&trade_id).is_some()
    }

    /// Evict every entry idle for longer than the expiry window.
    ///
    /// Returns the number of evicted entries.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| now.saturating_duration_since(entry.last_access) <= self.expiry);
        let evicted = before - entries.len();
        if evicted > 0 {
            self.expired_total
                .fetch_add(evicted as u64, Ordering::Relaxed);
            tracing::debug!("trade cache: sweep evicted {evicted} stale entries");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn hits_total(&self) -> u64 {
        self.hits_total.load(Ordering::Relaxed)
    }

    pub fn misses_total(&self) -> u64 {
        self.misses_total.load(Ordering::Relaxed)
    }

    /// Entries evicted for staleness, by reads and sweeps together.
    pub fn expired_total(&self) -> u64 {
        self.expired_total.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, CacheEntry>> {
        self.entries.lock().expect("trade cache mutex poisoned")
    }
}
