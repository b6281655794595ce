use crate::error_code::ErrorKind;
use std::time::Duration;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ErrorContext {
    /// Entity whose analysis was being produced
    pub entity_id: Option<String>,
    /// Additional context about the error (e.g., path, key, expected shape)
    pub details: Option<String>,
    /// Component that raised the error (e.g., "file_store", "config_loader")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entity_id(mut self, entity_id: impl Into<String>) -> Self {
        self.entity_id = Some(entity_id.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Unified error type for the analysis cache layer.
#[derive(Debug, Error)]
pub enum Error {
    /// A source item could not be read, so no checksum (and no cache decision) is possible.
    #[error("Fetch error for '{reference}': {message}")]
    Fetch { reference: String, message: String },

    /// An external AI call failed after classification (and possibly retries).
    #[error("AI call failed ({kind}) after {attempts} attempt(s): {message}")]
    Ai {
        kind: ErrorKind,
        message: String,
        attempts: u32,
        retry_after_ms: Option<u64>,
    },

    #[error("Storage error: {message}{}", format_context(.context))]
    Storage {
        message: String,
        context: ErrorContext,
    },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref entity) = ctx.entity_id {
        parts.push(format!("entity: {}", entity));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn fetch(reference: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Fetch {
            reference: reference.into(),
            message: message.into(),
        }
    }

    pub fn storage_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Storage {
            message: msg.into(),
            context,
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Fetch { .. } => "FETCH_ERROR",
            Error::Ai { kind, .. } => kind.code(),
            Error::Storage { .. } | Error::Io(_) => "STORAGE_ERROR",
            Error::Configuration { .. } | Error::Yaml(_) => "CONFIGURATION_ERROR",
            Error::Validation { .. } => "INVALID_INPUT",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Message suitable for showing to an end user; `Display` stays technical.
    pub fn user_message(&self) -> String {
        match self {
            Error::Fetch { .. } => {
                "One of the screenshots could not be loaded. Please re-upload it and try again."
                    .to_string()
            }
            Error::Ai {
                kind: ErrorKind::RateLimited,
                retry_after_ms: Some(ms),
                ..
            } => format!(
                "The AI service is busy right now. Please try again in {} seconds.",
                ms.div_ceil(1000)
            ),
            Error::Ai { kind, .. } => kind.user_message().to_string(),
            Error::Validation { .. } => "The request was not valid.".to_string(),
            _ => "An internal error occurred. Please try again later.".to_string(),
        }
    }

    /// Classified AI error kind, if this is an AI failure.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Ai { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Number of attempts made before giving up, for AI failures.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Error::Ai { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Suggested wait before trying again (set for rate limits).
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::Ai {
                retry_after_ms: Some(ms),
                ..
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Storage { context, .. }
            | Error::Configuration { context, .. }
            | Error::Validation { context, .. } => Some(context),
            _ => None,
        }
    }
}
