//! Namespaced, two-tier cache: a bounded in-memory LRU and an optional
//! on-disk persistent store, behind one `Cache` trait so the PVE client
//! does not care which backend serves a given namespace.

mod memory;
mod persistent;

pub use memory::MemoryCache;
pub use persistent::PersistentCache;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::PveError;

pub const DEFAULT_TTL: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_MEMORY_ENTRIES: usize = 2_000;

/// Storage contract shared by the memory and persistent backends.
///
/// Values are opaque bytes: callers serialize exactly once before
/// calling `set` and deserialize exactly once after `get`.
pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, PveError>;

    /// Returns `(value, is_fresh)` regardless of expiry. Used by callers
    /// operating in "stale OK" mode.
    fn get_stale(&self, key: &str) -> Result<Option<(Vec<u8>, bool)>, PveError>;

    fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), PveError>;

    fn delete(&self, key: &str) -> Result<(), PveError>;

    fn clear(&self) -> Result<(), PveError>;

    fn close(&self) -> Result<(), PveError>;
}

/// Produces isolated namespaced caches. Clearing one namespace must
/// never evict another's entries, so each namespace gets its own
/// backing storage handle rather than a shared map with key prefixing.
pub struct CacheFactory {
    backend: Backend,
    registry: Mutex<HashMap<String, Arc<dyn Cache>>>,
}

enum Backend {
    Memory { max_entries: usize },
    Persistent { root: PathBuf, max_entries: usize },
}

impl CacheFactory {
    pub fn memory(max_entries: usize) -> Self {
        Self {
            backend: Backend::Memory { max_entries },
            registry: Mutex::new(HashMap::new()),
        }
    }

    pub fn persistent(root: PathBuf, max_entries: usize) -> Self {
        Self {
            backend: Backend::Persistent { root, max_entries },
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the cache for `namespace`, creating it on first use.
    pub fn namespaced(&self, namespace: &str) -> Result<Arc<dyn Cache>, PveError> {
        if let Some(existing) = self.registry.lock().get(namespace) {
            return Ok(Arc::clone(existing));
        }

        let created: Arc<dyn Cache> = match &self.backend {
            Backend::Memory { max_entries } => Arc::new(MemoryCache::new(*max_entries)),
            Backend::Persistent { root, max_entries } => {
                Arc::new(PersistentCache::open(root.join(namespace), *max_entries)?)
            }
        };

        let mut registry = self.registry.lock();
        let entry = registry.entry(namespace.to_string()).or_insert_with(|| created.clone());
        Ok(Arc::clone(entry))
    }

    /// Closes every namespace created so far, stopping any background
    /// GC workers. Idempotent: repeat calls find an empty registry.
    pub fn close_all(&self) -> Result<(), PveError> {
        let caches: Vec<Arc<dyn Cache>> = self.registry.lock().drain().map(|(_, v)| v).collect();
        for cache in caches {
            cache.close()?;
        }
        Ok(())
    }
}
