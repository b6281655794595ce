//! Cache store implementations.

use super::entry::CacheEntry;
use crate::checksum::checksum_bytes;
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// Persistence for cache entries. `get` returns the current entry for an entity.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, entity_id: &str) -> Result<Option<CacheEntry>>;
    /// Stores `entry` atomically as the entity's current entry and returns it.
    async fn put(&self, entry: CacheEntry) -> Result<CacheEntry>;
    /// Records an access on the entity's current entry, but only while that entry is
    /// still `entry_id`. Returns the updated entry, or `None` if it was superseded.
    async fn touch(&self, entity_id: &str, entry_id: &str, now_ms: u64)
        -> Result<Option<CacheEntry>>;
    fn name(&self) -> &'static str;
}

fn poisoned(source: &str) -> Error {
    Error::storage_with_context("store lock poisoned", ErrorContext::new().with_source(source))
}

/// In-memory store bounded by entity count; least recently used entities are dropped first.
pub struct MemoryCacheStore {
    entries: Mutex<LruCache<String, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new(max_entities: usize) -> Self {
        let cap = NonZeroUsize::new(max_entities).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, entity_id: &str) -> Result<Option<CacheEntry>> {
        let mut entries = self.entries.lock().map_err(|_| poisoned("memory_store"))?;
        Ok(entries.get(entity_id).cloned())
    }

    async fn put(&self, entry: CacheEntry) -> Result<CacheEntry> {
        let mut entries = self.entries.lock().map_err(|_| poisoned("memory_store"))?;
        entries.put(entry.entity_id.clone(), entry.clone());
        Ok(entry)
    }

    async fn touch(
        &self,
        entity_id: &str,
        entry_id: &str,
        now_ms: u64,
    ) -> Result<Option<CacheEntry>> {
        let mut entries = self.entries.lock().map_err(|_| poisoned("memory_store"))?;
        Ok(entries
            .get_mut(entity_id)
            .filter(|current| current.id == entry_id)
            .map(|current| {
                current.record_access(now_ms);
                current.clone()
            }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// One JSON document per entity under a directory.
///
/// Writes go to a temporary sibling file which is then renamed over the target,
/// so readers never observe a half-written entry. Writers within one process are
/// serialized, which keeps [`touch`](CacheStore::touch) from resurrecting an entry
/// that a concurrent `put` replaced.
pub struct FileCacheStore {
    dir: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileCacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Entity ids are hashed so arbitrary ids map to safe file names.
    fn entry_path(&self, entity_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.json", checksum_bytes(entity_id.as_bytes())))
    }

    fn storage_error(entity_id: &str, e: impl std::fmt::Display) -> Error {
        Error::storage_with_context(
            e.to_string(),
            ErrorContext::new()
                .with_entity_id(entity_id)
                .with_source("file_store"),
        )
    }

    async fn read_entry(&self, entity_id: &str) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(entity_id);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Self::storage_error(entity_id, e)),
        };
        let entry: CacheEntry =
            serde_json::from_slice(&data).map_err(|e| Self::storage_error(entity_id, e))?;
        Ok(Some(entry))
    }

    /// Caller must hold `write_lock`.
    async fn write_entry(&self, entry: &CacheEntry) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Self::storage_error(&entry.entity_id, e))?;
        let path = self.entry_path(&entry.entity_id);
        let tmp = path.with_extension(format!("json.tmp-{}", Uuid::new_v4().simple()));
        let data = serde_json::to_vec_pretty(entry)?;
        tokio::fs::write(&tmp, &data)
            .await
            .map_err(|e| Self::storage_error(&entry.entity_id, e))?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Self::storage_error(&entry.entity_id, e));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn get(&self, entity_id: &str) -> Result<Option<CacheEntry>> {
        self.read_entry(entity_id).await
    }

    async fn put(&self, entry: CacheEntry) -> Result<CacheEntry> {
        let _writer = self.write_lock.lock().await;
        self.write_entry(&entry).await?;
        Ok(entry)
    }

    async fn touch(
        &self,
        entity_id: &str,
        entry_id: &str,
        now_ms: u64,
    ) -> Result<Option<CacheEntry>> {
        let _writer = self.write_lock.lock().await;
        let Some(mut current) = self.read_entry(entity_id).await? else {
            return Ok(None);
        };
        if current.id != entry_id {
            return Ok(None);
        }
        current.record_access(now_ms);
        self.write_entry(&current).await?;
        Ok(Some(current))
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Never stores anything; every lookup misses.
pub struct NullCacheStore;

impl NullCacheStore {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NullCacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for NullCacheStore {
    async fn get(&self, _: &str) -> Result<Option<CacheEntry>> {
        Ok(None)
    }
    async fn put(&self, entry: CacheEntry) -> Result<CacheEntry> {
        Ok(entry)
    }
    async fn touch(&self, _: &str, _: &str, _: u64) -> Result<Option<CacheEntry>> {
        Ok(None)
    }
    fn name(&self) -> &'static str {
        "null"
    }
}
