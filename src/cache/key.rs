//! Cache key derivation.

use crate::checksum::ChecksumRecord;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const SEPARATOR: &str = "|";

/// Identity of a reusable analysis: entity plus the content of its items, in order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CacheKey {
    pub entity_id: String,
    pub combined_checksum: String,
    pub item_count: usize,
}

impl CacheKey {
    /// Flat string form, `"<entity>:<combined>"`. Used for storage and in-flight tracking.
    pub fn storage_key(&self) -> String {
        format!("{}:{}", self.entity_id, self.combined_checksum)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}#{}",
            self.entity_id, self.combined_checksum, self.item_count
        )
    }
}

/// Builds [`CacheKey`]s. Pure: no I/O, no randomness.
#[derive(Debug, Clone, Default)]
pub struct CacheKeyBuilder {
    salt: Option<String>,
}

impl CacheKeyBuilder {
    pub fn new() -> Self {
        Self { salt: None }
    }

    /// Namespaces keys, e.g. per prompt version, so a prompt change invalidates old entries.
    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = Some(salt.into());
        self
    }

    /// Hash of the checksums joined in list order. Order matters.
    pub fn combine<'a, I>(&self, checksums: I) -> String
    where
        I: IntoIterator<Item = &'a str>,
    {
        let joined = checksums.into_iter().collect::<Vec<_>>().join(SEPARATOR);
        let mut hasher = Sha256::new();
        if let Some(ref s) = self.salt {
            hasher.update(s.as_bytes());
            hasher.update(SEPARATOR.as_bytes());
        }
        hasher.update(joined.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    pub fn build(&self, entity_id: &str, records: &[ChecksumRecord]) -> CacheKey {
        CacheKey {
            entity_id: entity_id.to_string(),
            combined_checksum: self.combine(records.iter().map(|r| r.checksum.as_str())),
            item_count: records.len(),
        }
    }
}
