//! Cache manager.

use super::backend::CacheStore;
use super::entry::CacheEntry;
use super::key::{CacheKey, CacheKeyBuilder};
use super::validator::{CacheValidator, InvalidationReason};
use crate::checksum::{ChecksumGenerator, ItemRef};
use crate::client::error_classification::ProviderFailure;
use crate::client::provider::{AiProvider, AiRequest};
use crate::client::validation::ResponseValidator;
use crate::resilience::rate_limiter::RateLimitStatus;
use crate::resilience::retry::{ProgressFn, RetryOrchestrator};
use crate::utils::clock::{Clock, SystemClock};
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false every call computes and nothing is read or written.
    pub enabled: bool,
    /// Entries older than this are `EXPIRED`; `None` disables expiry.
    pub max_age_secs: Option<u64>,
    /// Serialize concurrent misses on the same key.
    pub single_flight: bool,
    /// Bound for the in-memory store.
    pub max_entities: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_age_secs: None,
            single_flight: true,
            max_entities: 1000,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_max_age(mut self, max_age: Option<Duration>) -> Self {
        self.max_age_secs = max_age.map(|d| d.as_secs());
        self
    }

    pub fn with_single_flight(mut self, single_flight: bool) -> Self {
        self.single_flight = single_flight;
        self
    }

    pub fn with_max_entities(mut self, max_entities: usize) -> Self {
        self.max_entities = max_entities;
        self
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    /// Store reads and writes that failed
    pub errors: u64,
}

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Default)]
struct AtomicStats {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    errors: AtomicU64,
}

impl AtomicStats {
    fn to_stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Progress of one lookup, reported to [`GetOptions::on_cache_status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheStatus {
    Checking,
    Hit {
        entry_id: String,
    },
    Miss {
        reason: InvalidationReason,
        changed_item_ids: Vec<String>,
    },
    Stored {
        entry_id: String,
    },
}

pub type CacheStatusFn<'a> = dyn Fn(&CacheStatus) + Send + Sync + 'a;

#[derive(Default, Clone, Copy)]
pub struct GetOptions<'a> {
    /// Skip the stored entry and recompute.
    pub force_refresh: bool,
    pub on_cache_status: Option<&'a CacheStatusFn<'a>>,
    /// Forwarded to the retry orchestrator before every wait.
    pub on_retry: Option<&'a ProgressFn<'a>>,
}

impl<'a> GetOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn force_refresh(mut self) -> Self {
        self.force_refresh = true;
        self
    }

    pub fn with_cache_status(mut self, cb: &'a CacheStatusFn<'a>) -> Self {
        self.on_cache_status = Some(cb);
        self
    }

    pub fn with_retry_progress(mut self, cb: &'a ProgressFn<'a>) -> Self {
        self.on_retry = Some(cb);
        self
    }

    fn emit(&self, status: CacheStatus) {
        if let Some(cb) = self.on_cache_status {
            cb(&status);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub result: Value,
    pub from_cache: bool,
    /// Entry that served or stored the result; `None` when nothing was persisted.
    pub cache_entry_id: Option<String>,
}

type InFlightMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

/// Holds a per-key lock; removes the key from the map once no one else wants it.
struct InFlightGuard<'a> {
    map: &'a InFlightMap,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut map = self.map.lock().unwrap_or_else(|e| e.into_inner());
        if map
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&self.key);
        }
    }
}

/// Checksum-keyed cache in front of an expensive AI computation.
///
/// Construct once and share; all state (statistics, in-flight keys, the rate-limit
/// tracker inside the orchestrator) is internal and thread-safe.
pub struct AnalysisCache {
    config: CacheConfig,
    store: Arc<dyn CacheStore>,
    generator: ChecksumGenerator,
    keys: CacheKeyBuilder,
    validator: CacheValidator,
    orchestrator: RetryOrchestrator,
    clock: Arc<dyn Clock>,
    stats: AtomicStats,
    in_flight: InFlightMap,
}

impl AnalysisCache {
    pub fn new(
        config: CacheConfig,
        store: Arc<dyn CacheStore>,
        generator: ChecksumGenerator,
        orchestrator: RetryOrchestrator,
    ) -> Self {
        let validator = CacheValidator::new().with_max_age(config.max_age());
        Self {
            config,
            store,
            generator,
            keys: CacheKeyBuilder::new(),
            validator,
            orchestrator,
            clock: Arc::new(SystemClock),
            stats: AtomicStats::default(),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Clock used for entry timestamps and expiry.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_key_builder(mut self, keys: CacheKeyBuilder) -> Self {
        self.keys = keys;
        self
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.to_stats()
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    /// Snapshot of the shared provider rate limit, for pre-empting doomed requests.
    pub fn rate_limit_status(&self) -> RateLimitStatus {
        self.orchestrator.tracker().status()
    }

    /// Returns the stored result for `entity_id` if its items are unchanged, otherwise
    /// runs `compute` under the retry orchestrator and stores the new result.
    ///
    /// Fetch failures abort before any cache decision. Store failures never fail the
    /// call: a failed read counts as a miss and a failed write leaves
    /// `cache_entry_id` empty.
    pub async fn get_or_compute<F, Fut>(
        &self,
        entity_id: &str,
        items: &[ItemRef],
        options: GetOptions<'_>,
        compute: F,
    ) -> Result<AnalysisOutcome>
    where
        F: FnMut(u32) -> Fut + Send,
        Fut: Future<Output = std::result::Result<Value, ProviderFailure>> + Send,
    {
        if !self.config.enabled {
            let result = self.orchestrator.execute(compute, options.on_retry).await?;
            return Ok(AnalysisOutcome {
                result,
                from_cache: false,
                cache_entry_id: None,
            });
        }

        options.emit(CacheStatus::Checking);
        let records = self.generator.generate_all(items).await?;
        let key = self.keys.build(entity_id, &records);

        let _in_flight = if self.config.single_flight {
            Some(self.acquire(&key).await)
        } else {
            None
        };

        let stored = match self.store.get(entity_id).await {
            Ok(entry) => entry,
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(entity_id, store = self.store.name(), error = %e, "cache read failed, treating as miss");
                None
            }
        };

        let now = self.clock.now_ms();
        let outcome =
            self.validator
                .evaluate(stored.as_ref(), &key, &records, options.force_refresh, now);

        if let (true, Some(entry), Some(result)) = (outcome.is_valid, stored, outcome.cached_result) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            debug!(
                entity_id,
                combined_checksum = key.combined_checksum.as_str(),
                entry_id = entry.id.as_str(),
                "cache hit"
            );
            options.emit(CacheStatus::Hit {
                entry_id: entry.id.clone(),
            });
            match self.store.touch(entity_id, &entry.id, now).await {
                Ok(Some(_)) => {}
                Ok(None) => debug!(
                    entity_id,
                    entry_id = entry.id.as_str(),
                    "entry superseded before access was recorded"
                ),
                Err(e) => warn!(entity_id, error = %e, "failed to record cache access"),
            }
            return Ok(AnalysisOutcome {
                result,
                from_cache: true,
                cache_entry_id: Some(entry.id),
            });
        }

        let reason = outcome
            .invalidation_reason
            .unwrap_or(InvalidationReason::NoEntry);
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        info!(
            entity_id,
            combined_checksum = key.combined_checksum.as_str(),
            reason = reason.as_str(),
            changed_items = outcome.changed_item_ids.len(),
            "cache miss"
        );
        options.emit(CacheStatus::Miss {
            reason,
            changed_item_ids: outcome.changed_item_ids,
        });

        let result = self.orchestrator.execute(compute, options.on_retry).await?;
        let cache_entry_id = self.persist(&key, records, result.clone(), &options).await;
        Ok(AnalysisOutcome {
            result,
            from_cache: false,
            cache_entry_id,
        })
    }

    /// Cached provider analysis: one prompt per distinct item set.
    ///
    /// Provider output must be JSON; unparseable output is `RESPONSE_PARSE` and output
    /// rejected by `validator`'s schema is `VALIDATION`, both retried.
    pub async fn analyze(
        &self,
        entity_id: &str,
        items: &[ItemRef],
        request: &AiRequest,
        provider: &dyn AiProvider,
        validator: &ResponseValidator,
        options: GetOptions<'_>,
    ) -> Result<AnalysisOutcome> {
        debug!(entity_id, provider = provider.name(), "analyze");
        self.get_or_compute(entity_id, items, options, |_attempt| async move {
            let text = provider.complete(request).await?;
            validator.parse(&text)
        })
        .await
    }

    async fn persist(
        &self,
        key: &CacheKey,
        records: Vec<crate::checksum::ChecksumRecord>,
        result: Value,
        options: &GetOptions<'_>,
    ) -> Option<String> {
        let entry = CacheEntry::new(key, records, result, self.clock.now_ms());
        match self.store.put(entry).await {
            Ok(stored) => {
                self.stats.stores.fetch_add(1, Ordering::Relaxed);
                debug!(
                    entity_id = key.entity_id.as_str(),
                    entry_id = stored.id.as_str(),
                    item_count = key.item_count,
                    "cache entry stored"
                );
                options.emit(CacheStatus::Stored {
                    entry_id: stored.id.clone(),
                });
                Some(stored.id)
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(
                    entity_id = key.entity_id.as_str(),
                    store = self.store.name(),
                    error = %e,
                    "cache write failed, returning uncached result"
                );
                None
            }
        }
    }

    async fn acquire(&self, key: &CacheKey) -> InFlightGuard<'_> {
        let name = key.storage_key();
        let lock = {
            let mut map = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(name.clone()).or_default().clone()
        };
        let guard = lock.lock_owned().await;
        InFlightGuard {
            map: &self.in_flight,
            key: name,
            guard: Some(guard),
        }
    }

    #[cfg(test)]
    fn in_flight_len(&self) -> usize {
        self.in_flight.lock().map(|m| m.len()).unwrap_or(0)
    }
}
