//! Parsing and schema validation of model output.

use super::error_classification::ProviderFailure;
use crate::{Error, ErrorContext, Result};
use jsonschema::{Draft, JSONSchema};
use serde_json::Value;

/// Turns raw model text into JSON, optionally checked against a JSON Schema.
///
/// Unparseable text maps to [`ProviderFailure::MalformedBody`] and schema failures to
/// [`ProviderFailure::SchemaViolation`], so both flow through classification and retry.
pub struct ResponseValidator {
    schema: Option<JSONSchema>,
}

impl ResponseValidator {
    /// Accepts any well-formed JSON.
    pub fn permissive() -> Self {
        Self { schema: None }
    }

    pub fn with_schema(schema: &Value) -> Result<Self> {
        let compiled = JSONSchema::options()
            .with_draft(Draft::Draft7)
            .compile(schema)
            .map_err(|e| {
                Error::configuration_with_context(
                    format!("Failed to compile response schema: {}", e),
                    ErrorContext::new().with_source("response_validator"),
                )
            })?;
        Ok(Self {
            schema: Some(compiled),
        })
    }

    pub fn has_schema(&self) -> bool {
        self.schema.is_some()
    }

    pub fn parse(&self, text: &str) -> std::result::Result<Value, ProviderFailure> {
        let body = strip_code_fence(text);
        let value: Value = serde_json::from_str(body)
            .map_err(|e| ProviderFailure::MalformedBody(e.to_string()))?;
        self.validate(&value)?;
        Ok(value)
    }

    pub fn validate(&self, value: &Value) -> std::result::Result<(), ProviderFailure> {
        let Some(schema) = &self.schema else {
            return Ok(());
        };
        if let Err(errors) = schema.validate(value) {
            let messages: Vec<String> = errors
                .map(|e| {
                    let path = e.instance_path.to_string();
                    if path.is_empty() {
                        e.to_string()
                    } else {
                        format!("{}: {}", path, e)
                    }
                })
                .collect();
            return Err(ProviderFailure::SchemaViolation(messages.join("; ")));
        }
        Ok(())
    }
}

/// Models often wrap JSON in a Markdown fence; take the fenced body if present.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
