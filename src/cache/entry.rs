//! Stored analysis entries.

use super::key::CacheKey;
use crate::checksum::ChecksumRecord;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One computed analysis together with the item checksums it was computed from.
///
/// Entries are never partially written. A new entry supersedes the previous one for
/// the same entity once its items change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub id: String,
    pub entity_id: String,
    pub combined_checksum: String,
    pub item_checksums: Vec<ChecksumRecord>,
    pub result: serde_json::Value,
    /// Epoch milliseconds
    pub created_at: u64,
    pub last_accessed_at: u64,
    pub access_count: u64,
}

impl CacheEntry {
    pub fn new(
        key: &CacheKey,
        item_checksums: Vec<ChecksumRecord>,
        result: serde_json::Value,
        now_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            entity_id: key.entity_id.clone(),
            combined_checksum: key.combined_checksum.clone(),
            item_checksums,
            result,
            created_at: now_ms,
            last_accessed_at: now_ms,
            access_count: 0,
        }
    }

    pub fn item_count(&self) -> usize {
        self.item_checksums.len()
    }

    pub fn key(&self) -> CacheKey {
        CacheKey {
            entity_id: self.entity_id.clone(),
            combined_checksum: self.combined_checksum.clone(),
            item_count: self.item_count(),
        }
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.created_at)
    }

    /// Bumps access metadata in place.
    pub fn record_access(&mut self, now_ms: u64) {
        self.last_accessed_at = now_ms;
        self.access_count = self.access_count.saturating_add(1);
    }
}
