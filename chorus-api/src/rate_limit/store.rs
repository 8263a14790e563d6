//! Rate-limit entry storage
//!
//! The limiter only talks to [`RateLimitStore`], so a shared backend can
//! replace the in-process map without touching the counting algorithm.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Counter state for one identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitEntry {
    /// Requests admitted in the current window
    pub count: u32,
    /// Unix epoch milliseconds at which the window ends
    pub window_end_ms: i64,
}

impl RateLimitEntry {
    /// An entry is expired strictly after its window end
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms > self.window_end_ms
    }
}

/// Storage abstraction for rate-limit entries
///
/// Implementations must make `compare_and_swap` atomic per key.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn get(&self, key: &str) -> Option<RateLimitEntry>;

    /// Unconditionally overwrite the entry for `key`
    async fn set(&self, key: &str, entry: RateLimitEntry);

    /// Replace the entry for `key` with `new` only if it currently equals
    /// `expected` (`None` meaning absent). Returns whether the swap happened.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<RateLimitEntry>,
        new: RateLimitEntry,
    ) -> bool;

    /// Delete every entry expired at `now_ms`; returns how many were removed
    async fn sweep_expired(&self, now_ms: i64) -> usize;

    /// Number of live entries
    async fn len(&self) -> usize;
}

/// Process-local store
///
/// Does not coordinate across instances.
#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    entries: Mutex<HashMap<String, RateLimitEntry>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock cannot leave a half-written entry,
    // so a poisoned map is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, RateLimitEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RateLimitStore for InMemoryRateLimitStore {
    async fn get(&self, key: &str) -> Option<RateLimitEntry> {
        self.lock().get(key).copied()
    }

    async fn set(&self, key: &str, entry: RateLimitEntry) {
        self.lock().insert(key.to_string(), entry);
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: Option<RateLimitEntry>,
        new: RateLimitEntry,
    ) -> bool {
        let mut entries = self.lock();
        if entries.get(key).copied() != expected {
            return false;
        }
        entries.insert(key.to_string(), new);
        true
    }

    async fn sweep_expired(&self, now_ms: i64) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now_ms));
        before - entries.len()
    }

    async fn len(&self) -> usize {
        self.lock().len()
    }
}
