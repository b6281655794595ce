//! Content checksums for source items.
//!
//! # Checksum Module
//!
//! Every source item (typically one screenshot) is hashed into a
//! [`ChecksumRecord`]. The records, in display order, are what the cache key is
//! derived from, so a changed, added, removed or reordered screenshot always
//! produces a different key.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ChecksumGenerator`] | Fetches bytes and computes a SHA-256 digest |
//! | [`SourceFetcher`] | Trait for reading item bytes |
//! | [`FileFetcher`] / [`HttpFetcher`] | Local path and HTTP(S) fetchers |
//! | [`DefaultFetcher`] | Dispatches on the reference scheme |
//! | [`StaticFetcher`] | In-memory fetcher for tests and pre-loaded bytes |

mod fetch;
mod generator;

pub use fetch::{DefaultFetcher, FileFetcher, HttpFetcher, SourceFetcher, StaticFetcher};
pub use generator::{checksum_bytes, ChecksumGenerator};

use serde::{Deserialize, Serialize};

/// Reference to one source item of an entity, in canonical display order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemRef {
    pub item_id: String,
    pub source_url: String,
}

impl ItemRef {
    pub fn new(item_id: impl Into<String>, source_url: impl Into<String>) -> Self {
        Self {
            item_id: item_id.into(),
            source_url: source_url.into(),
        }
    }
}

/// Immutable content hash of one source item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecksumRecord {
    pub item_id: String,
    /// Lowercase hex SHA-256 of the item bytes
    pub checksum: String,
    pub source_url: String,
    /// Epoch milliseconds
    pub generated_at: u64,
}
