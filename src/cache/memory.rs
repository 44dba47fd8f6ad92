// src/cache/memory.rs
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::cache::{validate_key, CacheEntry, CacheStore};
use crate::error::CacheError;

/// Volatile store; lost on restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<HashMap<String, Arc<CacheEntry>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn get_sync(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let map = match self.inner.read() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        map.get(key).cloned()
    }

    pub(crate) fn put_sync(&self, key: &str, entry: Arc<CacheEntry>) {
        let mut map = match self.inner.write() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        map.insert(key.to_string(), entry);
    }
}

#[async_trait::async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        self.get_sync(key)
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        validate_key(key)?;
        self.put_sync(key, Arc::new(entry));
        Ok(())
    }
}
