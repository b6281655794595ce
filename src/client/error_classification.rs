//! Error classification logic

use crate::error_code::ErrorKind;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Raw failure surface of one provider call, before classification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderFailure {
    #[error("HTTP {status}: {body}")]
    Http {
        status: u16,
        /// Parsed `Retry-After`, if the response carried one
        retry_after_ms: Option<u64>,
        /// Structured error code from the response body (e.g. `rate_limit_exceeded`)
        provider_code: Option<String>,
        body: String,
    },
    #[error("network failure: {0}")]
    Network(String),
    #[error("timed out after {after_ms} ms")]
    Timeout { after_ms: u64 },
    #[error("malformed response body: {0}")]
    MalformedBody(String),
    #[error("response failed schema validation: {0}")]
    SchemaViolation(String),
    #[error("{0}")]
    Other(String),
}

impl ProviderFailure {
    pub fn http(status: u16, body: impl Into<String>) -> Self {
        ProviderFailure::Http {
            status,
            retry_after_ms: None,
            provider_code: None,
            body: body.into(),
        }
    }
}

/// Verdict for one failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    pub kind: ErrorKind,
    pub retryable: bool,
    pub retry_after_ms: Option<u64>,
    pub message: String,
}

impl ClassifiedError {
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after_ms.map(Duration::from_millis)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Whether unclassifiable failures are retried.
    pub unknown_retryable: bool,
    /// Retry-after assumed for rate limits that carry none.
    /// `None` leaves the wait to the rate-limit tracker's escalating default.
    pub default_retry_after_ms: Option<u64>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            unknown_retryable: true,
            default_retry_after_ms: None,
        }
    }
}

impl ClassifierConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unknown_retryable(mut self, retryable: bool) -> Self {
        self.unknown_retryable = retryable;
        self
    }

    pub fn with_default_retry_after(mut self, wait: Option<Duration>) -> Self {
        self.default_retry_after_ms = wait.map(|d| d.as_millis() as u64);
        self
    }
}

/// Maps raw provider failures into the closed [`ErrorKind`] taxonomy.
///
/// Pure: the same failure and config always produce the same verdict.
pub struct ErrorClassifier {
    cfg: ClassifierConfig,
    patterns: Vec<(ErrorKind, Regex)>,
    retry_after: Regex,
}

impl ErrorClassifier {
    pub fn new(cfg: ClassifierConfig) -> Self {
        // Order matters: the first matching pattern wins.
        let table: [(ErrorKind, &str); 6] = [
            (
                ErrorKind::AuthInvalid,
                r"(?i)\b401\b|\b403\b|unauthori[sz]ed|(invalid|incorrect|missing)[ _-]?api[ _-]?key|api key not valid|permission denied",
            ),
            (
                ErrorKind::RateLimited,
                r"(?i)\b429\b|rate[ _-]?limit|quota|too many requests|resource[ _-]?exhausted",
            ),
            (ErrorKind::Timeout, r"(?i)timed? ?out|deadline exceeded"),
            (
                ErrorKind::Network,
                r"(?i)econnreset|econnrefused|enotfound|connection (refused|reset|closed)|socket hang up|network|dns",
            ),
            (
                ErrorKind::ResponseParse,
                r"(?i)unexpected token|invalid json|json parse|failed to parse|malformed",
            ),
            (
                ErrorKind::UpstreamUnavailable,
                r"(?i)\b5\d\d\b|service unavailable|overloaded|bad gateway|internal server error",
            ),
        ];
        let patterns = table
            .iter()
            .map(|(kind, pat)| (*kind, Regex::new(pat).expect("static classifier pattern")))
            .collect();
        let retry_after = Regex::new(
            r"(?i)(?:retry|try again)\s+(?:after|in)\s+(\d+(?:\.\d+)?)\s*(ms|milliseconds?|s|secs?|seconds?)?",
        )
        .expect("static retry-after pattern");
        Self {
            cfg,
            patterns,
            retry_after,
        }
    }

    pub fn config(&self) -> &ClassifierConfig {
        &self.cfg
    }

    pub fn classify(&self, failure: &ProviderFailure) -> ClassifiedError {
        let message = failure.to_string();
        let (kind, retryable, mut retry_after_ms) = match failure {
            ProviderFailure::Http {
                status,
                retry_after_ms,
                provider_code,
                body,
            } => {
                let kind = provider_code
                    .as_deref()
                    .and_then(ErrorKind::from_provider_code)
                    .unwrap_or_else(|| ErrorKind::from_http_status(*status));
                let retryable = match kind {
                    // The request itself was rejected; repeating it cannot help.
                    ErrorKind::Validation => false,
                    ErrorKind::Unknown => self.cfg.unknown_retryable,
                    k => k.retryable(),
                };
                let hint = retry_after_ms.or_else(|| self.retry_after_hint(body));
                (kind, retryable, hint)
            }
            ProviderFailure::Network(_) => (ErrorKind::Network, true, None),
            ProviderFailure::Timeout { .. } => (ErrorKind::Timeout, true, None),
            ProviderFailure::MalformedBody(_) => (ErrorKind::ResponseParse, true, None),
            // Model output is non-deterministic; another attempt may conform.
            ProviderFailure::SchemaViolation(_) => (ErrorKind::Validation, true, None),
            ProviderFailure::Other(msg) => {
                let kind = self
                    .patterns
                    .iter()
                    .find(|(_, re)| re.is_match(msg))
                    .map(|(kind, _)| *kind)
                    .unwrap_or(ErrorKind::Unknown);
                let retryable = match kind {
                    ErrorKind::Unknown => self.cfg.unknown_retryable,
                    k => k.retryable(),
                };
                (kind, retryable, self.retry_after_hint(msg))
            }
        };

        if kind == ErrorKind::RateLimited {
            retry_after_ms = retry_after_ms.or(self.cfg.default_retry_after_ms);
        } else {
            retry_after_ms = None;
        }

        ClassifiedError {
            kind,
            retryable,
            retry_after_ms,
            message,
        }
    }

    /// Extracts "retry after 20s" style hints from free text.
    fn retry_after_hint(&self, text: &str) -> Option<u64> {
        let caps = self.retry_after.captures(text)?;
        let value: f64 = caps.get(1)?.as_str().parse().ok()?;
        let is_ms = caps
            .get(2)
            .map(|u| u.as_str().to_ascii_lowercase().starts_with("m"))
            .unwrap_or(false);
        let ms = if is_ms { value } else { value * 1000.0 };
        Some(ms.round() as u64)
    }
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(f: ProviderFailure) -> ClassifiedError {
        ErrorClassifier::default().classify(&f)
    }

    #[test]
    fn test_auth_is_not_retryable() {
        for status in [401, 403] {
            let c = classify(ProviderFailure::http(status, "nope"));
            assert_eq!(c.kind, ErrorKind::AuthInvalid);
            assert!(!c.retryable);
        }
    }

    #[test]
    fn test_rate_limit_uses_header_then_body_hint() {
        let c = classify(ProviderFailure::Http {
            status: 429,
            retry_after_ms: Some(5_000),
            provider_code: None,
            body: "slow down".into(),
        });
        assert_eq!(c.kind, ErrorKind::RateLimited);
        assert!(c.retryable);
        assert_eq!(c.retry_after_ms, Some(5_000));

        let c = classify(ProviderFailure::http(
            429,
            "Rate limit reached. Please try again in 1.5s.",
        ));
        assert_eq!(c.retry_after_ms, Some(1_500));

        let c = classify(ProviderFailure::http(429, "slow down"));
        assert_eq!(c.retry_after_ms, None);
    }

    #[test]
    fn test_default_retry_after_applies_to_rate_limits_only() {
        let classifier = ErrorClassifier::new(
            ClassifierConfig::new().with_default_retry_after(Some(Duration::from_secs(30))),
        );
        let c = classifier.classify(&ProviderFailure::http(429, ""));
        assert_eq!(c.retry_after_ms, Some(30_000));
        let c = classifier.classify(&ProviderFailure::http(503, "retry after 3s"));
        assert_eq!(c.retry_after_ms, None);
    }

    #[test]
    fn test_server_errors_and_transport_failures_are_retryable() {
        let cases = [
            (ProviderFailure::http(500, ""), ErrorKind::UpstreamUnavailable),
            (ProviderFailure::http(503, ""), ErrorKind::UpstreamUnavailable),
            (ProviderFailure::Network("reset".into()), ErrorKind::Network),
            (ProviderFailure::Timeout { after_ms: 100 }, ErrorKind::Timeout),
            (ProviderFailure::MalformedBody("eof".into()), ErrorKind::ResponseParse),
            (ProviderFailure::SchemaViolation("missing".into()), ErrorKind::Validation),
        ];
        for (failure, kind) in cases {
            let c = classify(failure);
            assert_eq!(c.kind, kind);
            assert!(c.retryable, "{:?} should be retryable", kind);
        }
    }

    #[test]
    fn test_rejected_request_is_validation_but_not_retryable() {
        let c = classify(ProviderFailure::http(400, "bad request"));
        assert_eq!(c.kind, ErrorKind::Validation);
        assert!(!c.retryable);
    }

    #[test]
    fn test_provider_code_overrides_status() {
        let c = classify(ProviderFailure::Http {
            status: 400,
            retry_after_ms: None,
            provider_code: Some("insufficient_quota".into()),
            body: String::new(),
        });
        assert_eq!(c.kind, ErrorKind::RateLimited);
        assert!(c.retryable);
    }

    #[test]
    fn test_unknown_retryability_follows_config() {
        let c = classify(ProviderFailure::Other("the flux capacitor broke".into()));
        assert_eq!(c.kind, ErrorKind::Unknown);
        assert!(c.retryable);

        let strict = ErrorClassifier::new(ClassifierConfig::new().with_unknown_retryable(false));
        assert!(!strict.classify(&ProviderFailure::http(418, "teapot")).retryable);
    }

    #[test]
    fn test_message_heuristics() {
        let cases = [
            ("Incorrect API key provided", ErrorKind::AuthInvalid),
            ("You exceeded your current quota", ErrorKind::RateLimited),
            ("request timed out", ErrorKind::Timeout),
            ("connect ECONNREFUSED 127.0.0.1:443", ErrorKind::Network),
            ("Unexpected token < in JSON at position 0", ErrorKind::ResponseParse),
            ("503 Service Unavailable", ErrorKind::UpstreamUnavailable),
        ];
        for (msg, kind) in cases {
            assert_eq!(classify(ProviderFailure::Other(msg.into())).kind, kind, "{}", msg);
        }
    }
}
