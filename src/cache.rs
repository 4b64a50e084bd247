//! Request response cache
//!
//! In-memory store for decoded RPC results, keyed by [`CacheKey`].
//!
//! Strategy:
//! - Entries keep their insertion order; overwriting a key keeps its slot
//! - With a capacity configured, inserting a new key into a full cache evicts
//!   the oldest entries first
//! - Without a capacity the cache grows until cleared

use crate::keys::CacheKey;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;

#[derive(Default)]
struct Entries {
    /// Map of key -> cached result
    values: HashMap<CacheKey, Value>,
    /// Keys in insertion order, oldest first
    order: VecDeque<CacheKey>,
}

/// Cache for RPC results, safe to share between threads and tasks.
///
/// Shared by handing out an `Arc<SimpleCache>`; every holder of the same
/// `Arc` sees the others' writes immediately.
pub struct SimpleCache {
    capacity: Option<NonZeroUsize>,
    entries: Mutex<Entries>,
}

impl SimpleCache {
    /// Create a new unbounded cache.
    pub fn new() -> Self {
        Self {
            capacity: None,
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Create a cache holding at most `capacity` entries.
    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self {
            capacity: Some(capacity),
            entries: Mutex::new(Entries::default()),
        }
    }

    /// Maximum number of entries, if bounded.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity.map(NonZeroUsize::get)
    }

    /// Insert or overwrite an entry.
    ///
    /// Returns the entries evicted to make room, oldest first, or `None` if
    /// nothing was evicted.
    pub fn cache(&self, key: CacheKey, value: Value) -> Option<Vec<(CacheKey, Value)>> {
        let mut entries = self.entries.lock();

        if let Some(slot) = entries.values.get_mut(&key) {
            *slot = value;
            return None;
        }

        let mut evicted = Vec::new();
        if let Some(capacity) = self.capacity {
            while entries.order.len() >= capacity.get() {
                let Some(oldest) = entries.order.pop_front() else {
                    break;
                };
                if let Some(old_value) = entries.values.remove(&oldest) {
                    evicted.push((oldest, old_value));
                }
            }
        }

        entries.order.push_back(key);
        entries.values.insert(key, value);

        if evicted.is_empty() {
            None
        } else {
            Some(evicted)
        }
    }

    /// Look up an entry.
    ///
    /// Returns:
    /// - `Some(value)` if the key is cached (including a cached `null`)
    /// - `None` on a miss
    pub fn get_cache_entry(&self, key: &CacheKey) -> Option<Value> {
        self.entries.lock().values.get(key).cloned()
    }

    /// Whether `key` is cached.
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.lock().values.contains_key(key)
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.values.clear();
        entries.order.clear();
    }

    /// Snapshot of all entries in insertion order.
    pub fn items(&self) -> Vec<(CacheKey, Value)> {
        let entries = self.entries.lock();
        entries
            .order
            .iter()
            .filter_map(|key| entries.values.get(key).map(|v| (*key, v.clone())))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SimpleCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SimpleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimpleCache")
            .field("capacity", &self.capacity)
            .field("len", &self.len())
            .finish()
    }
}
