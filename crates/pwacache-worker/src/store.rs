//! Versioned cache stores.
//!
//! ```text
//! CacheStorage (one per origin, shared by all worker generations)
//!     └── CacheStore "<prefix>-v<N>"
//!             └── resource key → CacheEntry
//! ```

use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, StatusCode};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::request::Response;

/// Storage shared between a host and its workers.
pub type SharedStorage = Arc<RwLock<CacheStorage>>;

/// A stored response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Response status.
    pub status: StatusCode,

    /// Response headers.
    pub headers: HeaderMap,

    /// Response body.
    pub body: Bytes,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response for storage.
    pub fn from_response(response: &Response) -> Self {
        Self {
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            cached_at: now_millis(),
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// One versioned cache namespace.
#[derive(Debug, Clone, Default)]
pub struct CacheStore {
    /// Cache name.
    pub name: String,

    entries: HashMap<String, CacheEntry>,
}

impl CacheStore {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    pub fn match_key(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn put(&mut self, key: &str, entry: CacheEntry) {
        self.entries.insert(key.to_string(), entry);
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(|s| s.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// All cache stores of one origin.
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: HashMap<String, CacheStore>,
}

impl CacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap for sharing between workers.
    pub fn shared() -> SharedStorage {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Open a store, creating it if it doesn't exist.
    pub fn open(&mut self, name: &str) -> &mut CacheStore {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| CacheStore::new(name))
    }

    pub fn get(&self, name: &str) -> Option<&CacheStore> {
        self.caches.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut CacheStore> {
        self.caches.get_mut(name)
    }

    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Insert a fully populated store, replacing any store of the same name.
    pub fn commit(&mut self, store: CacheStore) {
        self.caches.insert(store.name.clone(), store);
    }

    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// Delete every store except `keep`, returning the deleted names.
    pub fn retain_only(&mut self, keep: &str) -> Vec<String> {
        let stale: Vec<String> = self
            .caches
            .keys()
            .filter(|name| name.as_str() != keep)
            .cloned()
            .collect();
        for name in &stale {
            self.caches.remove(name);
        }
        stale
    }

    /// All store names, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.caches.keys().map(|s| s.as_str()).collect();
        keys.sort_unstable();
        keys
    }
}
