//! # ai-analysis-cache
//!
//! 面向大模型截图分析的校验和缓存与弹性调用层。
//!
//! Checksum-keyed result cache and resilient invocation layer for expensive
//! LLM-backed analyses of ordered item sets (for example, the screenshots of a UX flow).
//!
//! ## Overview
//!
//! An analysis is recomputed only when the source items it was computed from change.
//! Each item is hashed, the ordered hashes are folded into a combined checksum, and the
//! stored entry for the entity is validated against it. On a miss the external call runs
//! under a retry orchestrator that classifies failures, backs off with jitter, races each
//! attempt against a deadline, and shares rate-limit signals across concurrent callers.
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`checksum`] | Per-item content hashes and source fetchers |
//! | [`cache`] | Cache keys, entries, stores, validation and the [`AnalysisCache`] entry point |
//! | [`resilience`] | Retry orchestration, shared rate-limit tracking, per-attempt timeouts |
//! | [`client`] | Provider trait, raw failures, error classification, output validation |
//! | [`transport`] | OpenAI-compatible HTTP provider |
//! | [`config`] | YAML and environment configuration |
//! | [`error_code`] | Closed [`ErrorKind`] taxonomy |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_analysis_cache::cache::{GetOptions, MemoryCacheStore};
//! use ai_analysis_cache::checksum::{DefaultFetcher, ItemRef};
//! use ai_analysis_cache::client::{AiRequest, ResponseValidator};
//! use ai_analysis_cache::transport::HttpProvider;
//! use ai_analysis_cache::AnalysisConfig;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> ai_analysis_cache::Result<()> {
//!     let config = AnalysisConfig::from_file("analysis.yaml")?.apply_env_overrides()?;
//!     let cache = config.build_cache(
//!         Arc::new(MemoryCacheStore::new(config.cache.max_entities)),
//!         Arc::new(DefaultFetcher::new(Duration::from_secs(30))?),
//!     );
//!     let provider = HttpProvider::new(config.provider.clone())?;
//!
//!     let items = [
//!         ItemRef::new("step-1", "https://cdn.example.com/flow/1.png"),
//!         ItemRef::new("step-2", "https://cdn.example.com/flow/2.png"),
//!     ];
//!     let request = AiRequest::new("Summarize the usability issues in this flow.")
//!         .with_images(items.iter().map(|i| i.source_url.clone()))
//!         .json();
//!     let outcome = cache
//!         .analyze(
//!             "checkout-flow",
//!             &items,
//!             &request,
//!             &provider,
//!             &ResponseValidator::permissive(),
//!             GetOptions::new(),
//!         )
//!         .await?;
//!     println!("{} (cached: {})", outcome.result, outcome.from_cache);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod checksum;
pub mod client;
pub mod config;
pub mod error_code;
pub mod resilience;
pub mod testing;
pub mod transport;
pub mod utils;

pub use cache::{AnalysisCache, AnalysisOutcome, CacheStatus, GetOptions};
pub use config::AnalysisConfig;
pub use error_code::ErrorKind;
pub use resilience::RateLimitStatus;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
