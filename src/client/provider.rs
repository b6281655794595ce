//! AI provider abstraction.

use super::error_classification::ProviderFailure;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One prompt/response exchange with a generative model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiRequest {
    pub system: Option<String>,
    pub prompt: String,
    /// Images attached to the user turn, as URLs or data URLs
    pub image_urls: Vec<String>,
    /// Overrides the provider's configured model
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Ask the provider for a JSON object response
    pub json_mode: bool,
}

impl AiRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_images<I, S>(mut self, urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.image_urls.extend(urls.into_iter().map(Into::into));
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }
}

/// An external model endpoint. Implementations make exactly one attempt per call;
/// retries and deadlines are applied by [`crate::resilience::RetryOrchestrator`].
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Returns the generated text.
    async fn complete(&self, request: &AiRequest) -> Result<String, ProviderFailure>;
    fn name(&self) -> &str;
}
