//! 分析结果缓存模块：按源内容校验和复用已计算的 AI 分析结果。
//!
//! # Analysis Result Cache
//!
//! Stores one computed analysis per entity together with the checksums of the source
//! items it was computed from, and serves it back for as long as those items are
//! unchanged.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`AnalysisCache`] | `get_or_compute` entry point with statistics and single-flight |
//! | [`CacheKeyBuilder`] | Order-sensitive combined checksum over an entity's items |
//! | [`CacheValidator`] | Hit/miss decision with an [`InvalidationReason`] |
//! | [`CacheStore`] | Persistence trait; [`MemoryCacheStore`], [`FileCacheStore`], [`NullCacheStore`] |
//! | [`CacheEntry`] | Stored result plus per-item checksums and access metadata |
//!
//! ## Example
//!
//! ```rust,no_run
//! use ai_analysis_cache::cache::{AnalysisCache, CacheConfig, GetOptions, MemoryCacheStore};
//! use ai_analysis_cache::checksum::{ChecksumGenerator, FileFetcher, ItemRef};
//! use ai_analysis_cache::client::ErrorClassifier;
//! use ai_analysis_cache::resilience::{RateLimitTracker, RetryConfig, RetryOrchestrator};
//! use std::sync::Arc;
//!
//! # async fn run() -> ai_analysis_cache::Result<()> {
//! let orchestrator = RetryOrchestrator::new(
//!     RetryConfig::default(),
//!     Arc::new(ErrorClassifier::default()),
//!     Arc::new(RateLimitTracker::default()),
//! );
//! let cache = AnalysisCache::new(
//!     CacheConfig::default(),
//!     Arc::new(MemoryCacheStore::new(1000)),
//!     ChecksumGenerator::new(Arc::new(FileFetcher::new())),
//!     orchestrator,
//! );
//! let items = [ItemRef::new("step-1", "shots/step-1.png")];
//! let outcome = cache
//!     .get_or_compute("flow-42", &items, GetOptions::new(), |_attempt| async {
//!         Ok(serde_json::json!({ "summary": "..." }))
//!     })
//!     .await?;
//! println!("from cache: {}", outcome.from_cache);
//! # Ok(())
//! # }
//! ```

mod backend;
mod entry;
mod key;
mod manager;
mod validator;

pub use backend::{CacheStore, FileCacheStore, MemoryCacheStore, NullCacheStore};
pub use entry::CacheEntry;
pub use key::{CacheKey, CacheKeyBuilder};
pub use manager::{
    AnalysisCache, AnalysisOutcome, CacheConfig, CacheStats, CacheStatus, CacheStatusFn,
    GetOptions,
};
pub use validator::{CacheValidationOutcome, CacheValidator, InvalidationReason};
