//! Closed error taxonomy for external AI calls.
//!
//! Every failure coming back from the AI provider is mapped onto exactly one
//! [`ErrorKind`]. The kind carries a machine code, a default retry verdict and
//! a human-readable message so callers can render a useful failure without
//! inspecting provider-specific payloads.
//!
//! ## Example
//!
//! ```rust
//! use ai_analysis_cache::error_code::ErrorKind;
//!
//! let kind = ErrorKind::from_http_status(429);
//! assert_eq!(kind.code(), "RATE_LIMITED");
//! assert!(kind.retryable());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Classified kind of an external AI failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Invalid, expired or missing credentials (HTTP 401/403)
    AuthInvalid,
    /// Provider rate limit or quota signal (HTTP 429)
    RateLimited,
    /// No response before the deadline
    Timeout,
    /// Connection could not be established or was reset
    Network,
    /// Body could not be parsed into the expected shape
    ResponseParse,
    /// Well-formed response or request failed validation
    Validation,
    /// Provider-side failure (HTTP 5xx)
    UpstreamUnavailable,
    /// Could not be classified
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 8] = [
        ErrorKind::AuthInvalid,
        ErrorKind::RateLimited,
        ErrorKind::Timeout,
        ErrorKind::Network,
        ErrorKind::ResponseParse,
        ErrorKind::Validation,
        ErrorKind::UpstreamUnavailable,
        ErrorKind::Unknown,
    ];

    /// Machine code, stable across releases.
    #[inline]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AuthInvalid => "AUTH_INVALID",
            Self::RateLimited => "RATE_LIMITED",
            Self::Timeout => "TIMEOUT",
            Self::Network => "NETWORK",
            Self::ResponseParse => "RESPONSE_PARSE",
            Self::Validation => "VALIDATION",
            Self::UpstreamUnavailable => "UPSTREAM_UNAVAILABLE",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Default retry verdict for this kind.
    ///
    /// Individual classifications may override this (a rejected request body is
    /// `Validation` but not retryable, see [`crate::client::ErrorClassifier`]).
    #[inline]
    pub fn retryable(&self) -> bool {
        !matches!(self, Self::AuthInvalid)
    }

    /// Message suitable for showing to an end user.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::AuthInvalid => "The AI service rejected our credentials. Please check the API key configuration.",
            Self::RateLimited => "The AI service is busy right now. Please wait a moment and try again.",
            Self::Timeout => "The analysis took too long to complete. Please try again.",
            Self::Network => "Could not reach the AI service. Check your connection and try again.",
            Self::ResponseParse => "The AI service returned an unreadable response. Please try again.",
            Self::Validation => "The AI service returned an incomplete analysis. Please try again.",
            Self::UpstreamUnavailable => "The AI service is temporarily unavailable. Please try again later.",
            Self::Unknown => "Something went wrong while running the analysis.",
        }
    }

    /// Maps an HTTP status code to the most likely kind.
    ///
    /// Statuses without a mapping return `ErrorKind::Unknown`.
    pub fn from_http_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::AuthInvalid,
            408 => Self::Timeout,
            400 | 404 | 413 | 422 => Self::Validation,
            429 => Self::RateLimited,
            s if s >= 500 => Self::UpstreamUnavailable,
            _ => Self::Unknown,
        }
    }

    /// Maps a provider error code (from an error body) to a kind.
    ///
    /// Covers the common OpenAI/Anthropic/Gemini spellings.
    pub fn from_provider_code(provider_code: &str) -> Option<Self> {
        let kind = match provider_code {
            "invalid_api_key" | "authentication_error" | "authentication" | "permission_error"
            | "permission_denied" | "unauthenticated" => Self::AuthInvalid,
            "rate_limit_exceeded" | "rate_limited" | "rate_limit_error" | "insufficient_quota"
            | "resource_exhausted" => Self::RateLimited,
            "overloaded_error" | "overloaded" | "server_error" | "api_error" | "unavailable" => {
                Self::UpstreamUnavailable
            }
            "timeout" | "deadline_exceeded" => Self::Timeout,
            "invalid_request_error" | "invalid_request" | "context_length_exceeded"
            | "invalid_argument" => Self::Validation,
            _ => return None,
        };
        Some(kind)
    }

    /// Parses a machine code back into a kind.
    pub fn from_code(code: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.code() == code)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}
