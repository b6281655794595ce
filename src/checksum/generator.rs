//! Checksum generation.

use super::fetch::SourceFetcher;
use super::{ChecksumRecord, ItemRef};
use crate::utils::clock::{Clock, SystemClock};
use crate::Result;
use futures::future::try_join_all;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

/// Lowercase hex SHA-256 of `bytes`.
pub fn checksum_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

pub struct ChecksumGenerator {
    fetcher: Arc<dyn SourceFetcher>,
    clock: Arc<dyn Clock>,
}

impl ChecksumGenerator {
    pub fn new(fetcher: Arc<dyn SourceFetcher>) -> Self {
        Self {
            fetcher,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Builds a record for bytes already in hand.
    pub fn record_for_bytes(&self, item: &ItemRef, bytes: &[u8]) -> ChecksumRecord {
        ChecksumRecord {
            item_id: item.item_id.clone(),
            checksum: checksum_bytes(bytes),
            source_url: item.source_url.clone(),
            generated_at: self.clock.now_ms(),
        }
    }

    /// Fetches one item and hashes it. Fetch failures surface as `Error::Fetch`.
    pub async fn generate(&self, item: &ItemRef) -> Result<ChecksumRecord> {
        let bytes = self.fetcher.fetch_bytes(&item.source_url).await?;
        let record = self.record_for_bytes(item, &bytes);
        debug!(
            item_id = item.item_id.as_str(),
            fetcher = self.fetcher.name(),
            size = bytes.len(),
            checksum = record.checksum.as_str(),
            "checksum generated"
        );
        Ok(record)
    }

    /// Hashes every item, preserving input order. The first failure aborts the batch.
    pub async fn generate_all(&self, items: &[ItemRef]) -> Result<Vec<ChecksumRecord>> {
        try_join_all(items.iter().map(|item| self.generate(item))).await
    }
}
