// src/cache/file.rs
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::fs;

use crate::cache::memory::MemoryStore;
use crate::cache::{validate_key, CacheEntry, CacheStore};
use crate::error::CacheError;

/// Durable store: `<dir>/<key>.json`, one document per key.
///
/// Snapshots read from disk are memoized, so only the first read after a
/// restart touches the file.
#[derive(Debug)]
pub struct FileStore {
    dir: PathBuf,
    memo: MemoryStore,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            memo: MemoryStore::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    async fn load(&self, key: &str) -> Option<CacheEntry> {
        let path = self.path_for(key);
        let bytes = match fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(target: "cache", key, path = %path.display(), error = %e, "cache file unreadable");
                return None;
            }
        };
        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) if entry.key == key => Some(entry),
            Ok(entry) => {
                tracing::warn!(target: "cache", key, found = %entry.key, "cache file holds another key");
                None
            }
            Err(e) => {
                tracing::warn!(target: "cache", key, path = %path.display(), error = %e, "cache file corrupt");
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl CacheStore for FileStore {
    async fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        if validate_key(key).is_err() {
            return None;
        }
        if let Some(hit) = self.memo.get_sync(key) {
            return Some(hit);
        }
        let entry = Arc::new(self.load(key).await?);
        self.memo.put_sync(key, entry.clone());
        Some(entry)
    }

    async fn put(&self, key: &str, entry: CacheEntry) -> Result<(), CacheError> {
        validate_key(key)?;
        fs::create_dir_all(&self.dir).await?;

        let bytes = serde_json::to_vec(&entry)?;
        let path = self.path_for(key);
        let tmp = self.dir.join(format!(".{key}.json.tmp"));
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, &path).await?;

        self.memo.put_sync(key, Arc::new(entry));
        tracing::debug!(target: "cache", key, path = %path.display(), bytes = bytes.len(), "snapshot written");
        Ok(())
    }
}
