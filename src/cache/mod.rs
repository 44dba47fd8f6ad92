// src/cache/mod.rs
//! Cache Store: one immutable snapshot per content key.
//!
//! Snapshots are replaced wholesale by `put`; readers hold an `Arc` to the
//! snapshot they got, so they never observe a half-written entry.

pub mod file;
pub mod memory;
pub mod orchestrator;

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::ingest::types::Item;

pub use file::FileStore;
pub use memory::MemoryStore;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    /// Newest first.
    pub items: Vec<Item>,
    pub last_updated: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, items: Vec<Item>, last_updated: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            items,
            last_updated,
        }
    }
}

#[async_trait::async_trait]
pub trait CacheStore: Send + Sync {
    /// `None` means the key was never populated (or its snapshot is unreadable).
    async fn get(&self, key: &str) -> Option<Arc<CacheEntry>>;
    async fn put(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError>;
}

/// Persistence strategy, chosen at runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheBackend {
    /// One JSON document per key under this directory; survives restarts.
    File(PathBuf),
    /// Process memory only.
    Memory,
}

impl CacheBackend {
    pub fn open(&self) -> Arc<dyn CacheStore> {
        match self {
            CacheBackend::File(dir) => Arc::new(FileStore::new(dir.clone())),
            CacheBackend::Memory => Arc::new(MemoryStore::new()),
        }
    }
}

/// Keys double as file names, so keep them to `[A-Za-z0-9_-]`.
pub fn validate_key(key: &str) -> Result<(), CacheError> {
    let ok = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(CacheError::InvalidKey(key.to_string()))
    }
}
