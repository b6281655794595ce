//! Runtime configuration.
//!
//! Loaded from YAML, then overridden by environment variables:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `AI_CACHE_MAX_RETRIES` | `retry.max_retries` |
//! | `AI_CACHE_ATTEMPT_TIMEOUT_MS` | `retry.attempt_timeout_ms` (`0` disables) |
//! | `AI_CACHE_MAX_AGE_SECS` | `cache.max_age_secs` (`0` disables) |
//! | `AI_PROVIDER_BASE_URL` | `provider.base_url` |
//! | `AI_PROVIDER_MODEL` | `provider.model` |
//! | `AI_HTTP_TIMEOUT_SECS` | `provider.timeout_secs` |

use crate::cache::{AnalysisCache, CacheConfig, CacheStore};
use crate::checksum::{ChecksumGenerator, SourceFetcher};
use crate::client::{ClassifierConfig, ErrorClassifier};
use crate::resilience::{RateLimitConfig, RateLimitTracker, RetryConfig, RetryOrchestrator};
use crate::transport::ProviderConfig;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub retry: RetryConfig,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub classifier: ClassifierConfig,
    pub provider: ProviderConfig,
}

impl AnalysisConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(yaml)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("cannot read config: {}", e),
                ErrorContext::new()
                    .with_details(path.display().to_string())
                    .with_source("config_loader"),
            )
        })?;
        debug!(path = %path.display(), "loaded analysis config");
        Self::from_yaml_str(&text)
    }

    /// Reads overrides from the process environment.
    pub fn apply_env_overrides(self) -> Result<Self> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides<F>(mut self, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(n) = parse_var::<u32>(&lookup, "AI_CACHE_MAX_RETRIES")? {
            self.retry.max_retries = n;
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "AI_CACHE_ATTEMPT_TIMEOUT_MS")? {
            self.retry.attempt_timeout_ms = (ms > 0).then_some(ms);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "AI_CACHE_MAX_AGE_SECS")? {
            self.cache.max_age_secs = (secs > 0).then_some(secs);
        }
        if let Some(url) = lookup("AI_PROVIDER_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Some(model) = lookup("AI_PROVIDER_MODEL") {
            self.provider.model = model;
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "AI_HTTP_TIMEOUT_SECS")? {
            self.provider.timeout_secs = secs.max(1);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &str, msg: &str| {
            Err(Error::configuration_with_context(
                msg.to_string(),
                ErrorContext::new()
                    .with_details(field.to_string())
                    .with_source("config_loader"),
            ))
        };
        if !(0.0..=1.0).contains(&self.retry.jitter_factor) {
            return invalid("retry.jitter_factor", "jitter factor must be within [0, 1]");
        }
        if self.retry.backoff_multiplier < 1.0 {
            return invalid("retry.backoff_multiplier", "backoff multiplier must be at least 1");
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return invalid("retry.initial_delay_ms", "initial delay exceeds max delay");
        }
        if self.rate_limit.default_wait_ms > self.rate_limit.max_wait_ms {
            return invalid("rate_limit.default_wait_ms", "default wait exceeds max wait");
        }
        if self.cache.max_entities == 0 {
            return invalid("cache.max_entities", "max entities must be positive");
        }
        url::Url::parse(&self.provider.base_url).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid provider base url: {}", e),
                ErrorContext::new()
                    .with_details("provider.base_url")
                    .with_source("config_loader"),
            )
        })?;
        Ok(())
    }

    /// Wires a cache from this configuration with a fresh rate-limit tracker.
    pub fn build_cache(
        &self,
        store: Arc<dyn CacheStore>,
        fetcher: Arc<dyn SourceFetcher>,
    ) -> AnalysisCache {
        let orchestrator = RetryOrchestrator::new(
            self.retry.clone(),
            Arc::new(ErrorClassifier::new(self.classifier.clone())),
            Arc::new(RateLimitTracker::new(self.rate_limit.clone())),
        );
        AnalysisCache::new(
            self.cache.clone(),
            store,
            ChecksumGenerator::new(fetcher),
            orchestrator,
        )
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid value '{}': {}", raw, e),
                ErrorContext::new()
                    .with_details(name.to_string())
                    .with_source("env"),
            )
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let cfg = AnalysisConfig::default();
        assert_eq!(cfg.retry.max_retries, 3);
        assert_eq!(cfg.retry.attempt_timeout_ms, Some(60_000));
        assert_eq!(cfg.cache.max_age_secs, None);
        assert!(cfg.cache.single_flight);
        assert!(cfg.classifier.unknown_retryable);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let cfg = AnalysisConfig::from_yaml_str(
            r#"
retry:
  max_retries: 5
  jitter_factor: 0.2
cache:
  max_age_secs: 86400
provider:
  model: gpt-4o
"#,
        )
        .unwrap();
        assert_eq!(cfg.retry.max_retries, 5);
        assert_eq!(cfg.retry.initial_delay_ms, 1_000);
        assert_eq!(cfg.cache.max_age_secs, Some(86_400));
        assert_eq!(cfg.provider.model, "gpt-4o");
        assert_eq!(cfg.provider.provider_id, "openai");
    }

    #[test]
    fn test_invalid_yaml_values_are_rejected() {
        let err = AnalysisConfig::from_yaml_str("retry:\n  jitter_factor: 1.5\n").unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
        let err = AnalysisConfig::from_yaml_str("retry: [1, 2]").unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }

    #[test]
    fn test_env_overrides() {
        let cfg = AnalysisConfig::default()
            .apply_overrides(env(&[
                ("AI_CACHE_MAX_RETRIES", "1"),
                ("AI_CACHE_ATTEMPT_TIMEOUT_MS", "0"),
                ("AI_CACHE_MAX_AGE_SECS", "3600"),
                ("AI_PROVIDER_BASE_URL", "http://localhost:8080"),
                ("AI_HTTP_TIMEOUT_SECS", "30"),
            ]))
            .unwrap();
        assert_eq!(cfg.retry.max_retries, 1);
        assert_eq!(cfg.retry.attempt_timeout_ms, None);
        assert_eq!(cfg.cache.max_age_secs, Some(3_600));
        assert_eq!(cfg.provider.base_url, "http://localhost:8080");
        assert_eq!(cfg.provider.timeout_secs, 30);
    }

    #[test]
    fn test_bad_env_value_names_variable() {
        let err = AnalysisConfig::default()
            .apply_overrides(env(&[("AI_CACHE_MAX_RETRIES", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("AI_CACHE_MAX_RETRIES"));
    }

    #[test]
    fn test_missing_file() {
        let err = AnalysisConfig::from_file("/nonexistent/analysis.yaml").unwrap_err();
        assert_eq!(err.code(), "CONFIGURATION_ERROR");
    }
}
