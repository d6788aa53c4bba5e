//! Bounded in-memory LRU cache backend.
//!
//! The `lru` crate's `LruCache` already unifies the recency list and the
//! key->entry map behind one structure, so a single `parking_lot::Mutex`
//! wrapping it satisfies "the LRU is guarded by a single mutex covering
//! both the map and the recency list".

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;

use super::Cache;
use crate::error::PveError;

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn is_fresh(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

/// `max_size == 0` means unlimited: entries are never evicted for
/// capacity, only for TTL expiry.
pub struct MemoryCache {
    inner: Mutex<LruCache<String, Entry>>,
    unbounded: Mutex<std::collections::HashMap<String, Entry>>,
    bounded: bool,
}

impl MemoryCache {
    pub fn new(max_size: usize) -> Self {
        match NonZeroUsize::new(max_size) {
            Some(cap) => Self {
                inner: Mutex::new(LruCache::new(cap)),
                unbounded: Mutex::new(std::collections::HashMap::new()),
                bounded: true,
            },
            None => Self {
                inner: Mutex::new(LruCache::unbounded()),
                unbounded: Mutex::new(std::collections::HashMap::new()),
                bounded: false,
            },
        }
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PveError> {
        match self.get_stale(key)? {
            Some((value, true)) => Ok(Some(value)),
            _ => Ok(None),
        }
    }

    fn get_stale(&self, key: &str) -> Result<Option<(Vec<u8>, bool)>, PveError> {
        if self.bounded {
            let mut inner = self.inner.lock();
            if let Some(entry) = inner.get(key) {
                let fresh = entry.is_fresh();
                if !fresh {
                    // Expired entries stay until evicted or overwritten;
                    // "stale OK" callers may still read them.
                    return Ok(Some((entry.value.clone(), false)));
                }
                return Ok(Some((entry.value.clone(), true)));
            }
            Ok(None)
        } else {
            let unbounded = self.unbounded.lock();
            Ok(unbounded.get(key).map(|e| (e.value.clone(), e.is_fresh())))
        }
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), PveError> {
        let entry = Entry { value, expires_at: Instant::now() + ttl };
        if self.bounded {
            self.inner.lock().put(key.to_string(), entry);
        } else {
            self.unbounded.lock().insert(key.to_string(), entry);
        }
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), PveError> {
        if self.bounded {
            self.inner.lock().pop(key);
        } else {
            self.unbounded.lock().remove(key);
        }
        Ok(())
    }

    fn clear(&self) -> Result<(), PveError> {
        if self.bounded {
            self.inner.lock().clear();
        } else {
            self.unbounded.lock().clear();
        }
        Ok(())
    }

    fn close(&self) -> Result<(), PveError> {
        // No background workers to stop; clearing releases memory eagerly.
        self.clear()
    }
}
