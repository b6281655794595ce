use crate::client::error_classification::ProviderFailure;
use crate::client::provider::{AiProvider, AiRequest};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use keyring::Entry;
use reqwest::header::HeaderMap;
use reqwest::Proxy;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::env;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Connection settings for an OpenAI-compatible chat-completions endpoint.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Used for key lookup (`<ID>_API_KEY`, keyring service entry)
    pub provider_id: String,
    pub base_url: String,
    pub chat_path: String,
    pub model: String,
    pub timeout_secs: u64,
    /// Explicit key; when absent the keyring and environment are consulted
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("provider_id", &self.provider_id)
            .field("base_url", &self.base_url)
            .field("chat_path", &self.chat_path)
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            provider_id: "openai".to_string(),
            base_url: "https://api.openai.com".to_string(),
            chat_path: "/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout_secs: 120,
            api_key: None,
        }
    }
}

impl ProviderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }
}

/// Single-attempt provider over HTTP. Constructed once and shared.
pub struct HttpProvider {
    client: reqwest::Client,
    cfg: ProviderConfig,
    api_key: Option<String>,
}

impl HttpProvider {
    pub fn new(cfg: ProviderConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .pool_max_idle_per_host(
                env::var("AI_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(16),
            )
            .pool_idle_timeout(Some(Duration::from_secs(90)));

        if let Ok(proxy_url) = env::var("AI_PROXY_URL") {
            if let Ok(proxy) = Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder.build().map_err(|e| {
            Error::configuration_with_context(
                format!("failed to build HTTP client: {}", e),
                ErrorContext::new().with_source("http_provider"),
            )
        })?;

        let api_key = cfg
            .api_key
            .clone()
            .or_else(|| Self::get_api_key(&cfg.provider_id));

        Ok(Self {
            client,
            cfg,
            api_key,
        })
    }

    fn get_api_key(provider_id: &str) -> Option<String> {
        // 1. Try Keyring
        if let Ok(entry) = Entry::new("ai-analysis-cache", provider_id) {
            if let Ok(key) = entry.get_password() {
                return Some(key);
            }
        }

        // 2. Try Environment Variable (PROVIDER_API_KEY)
        let env_var = format!("{}_API_KEY", provider_id.to_uppercase());
        env::var(env_var).ok()
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.cfg
    }

    fn url(&self) -> String {
        format!(
            "{}{}",
            self.cfg.base_url.trim_end_matches('/'),
            self.cfg.chat_path
        )
    }

    fn build_body(&self, request: &AiRequest) -> Value {
        let mut messages = Vec::new();
        if let Some(system) = &request.system {
            messages.push(json!({ "role": "system", "content": system }));
        }
        let user_content = if request.image_urls.is_empty() {
            json!(request.prompt)
        } else {
            let mut parts = vec![json!({ "type": "text", "text": request.prompt })];
            parts.extend(
                request
                    .image_urls
                    .iter()
                    .map(|url| json!({ "type": "image_url", "image_url": { "url": url } })),
            );
            Value::Array(parts)
        };
        messages.push(json!({ "role": "user", "content": user_content }));

        let mut body = json!({
            "model": request.model.as_deref().unwrap_or(&self.cfg.model),
            "messages": messages,
        });
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(m) = request.max_tokens {
            body["max_tokens"] = json!(m);
        }
        if request.json_mode {
            body["response_format"] = json!({ "type": "json_object" });
        }
        body
    }

    fn header_first(headers: &HeaderMap, names: &[&str]) -> Option<String> {
        names.iter().find_map(|name| {
            headers
                .get(*name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
    }

    /// `Retry-After: <seconds>` only; HTTP-date values are ignored.
    fn retry_after_ms(headers: &HeaderMap) -> Option<u64> {
        let raw = Self::header_first(headers, &["retry-after"])?;
        let secs: f64 = raw.parse().ok()?;
        (secs.is_finite() && secs >= 0.0).then(|| (secs * 1000.0).round() as u64)
    }

    /// `error.code`, falling back to `error.type` (OpenAI and Anthropic shapes).
    fn error_code_from_body(body: &str) -> Option<String> {
        let json: Value = serde_json::from_str(body).ok()?;
        let error = json.get("error")?;
        error
            .get("code")
            .and_then(Value::as_str)
            .or_else(|| error.get("type").and_then(Value::as_str))
            .map(str::to_string)
    }

    fn map_send_error(&self, e: reqwest::Error) -> ProviderFailure {
        if e.is_timeout() {
            ProviderFailure::Timeout {
                after_ms: self.cfg.timeout_secs.saturating_mul(1000),
            }
        } else if e.is_connect() || e.is_request() {
            ProviderFailure::Network(e.to_string())
        } else if e.is_decode() || e.is_body() {
            ProviderFailure::MalformedBody(e.to_string())
        } else {
            ProviderFailure::Other(e.to_string())
        }
    }
}

#[async_trait]
impl AiProvider for HttpProvider {
    async fn complete(&self, request: &AiRequest) -> std::result::Result<String, ProviderFailure> {
        let body = self.build_body(request);
        let start = Instant::now();

        let mut req = self.client.post(self.url()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let resp = req.send().await.map_err(|e| self.map_send_error(e))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let headers = resp.headers().clone();
            let retry_after_ms = Self::retry_after_ms(&headers);
            let text = resp.text().await.unwrap_or_default();
            let provider_code = Self::error_code_from_body(&text);
            info!(
                http_status = status,
                provider_code = provider_code.as_deref().unwrap_or(""),
                retry_after_ms = retry_after_ms.unwrap_or(0),
                upstream_id = Self::header_first(&headers, &["x-request-id", "request-id", "cf-ray"])
                    .unwrap_or_default()
                    .as_str(),
                duration_ms = start.elapsed().as_millis() as u64,
                "provider request failed"
            );
            return Err(ProviderFailure::Http {
                status,
                retry_after_ms,
                provider_code,
                body: text,
            });
        }

        let json: Value = resp
            .json()
            .await
            .map_err(|e| ProviderFailure::MalformedBody(e.to_string()))?;
        let content = json
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ProviderFailure::MalformedBody("missing choices[0].message.content".to_string())
            })?;
        let model = json.get("model").and_then(Value::as_str).unwrap_or("");
        debug!(
            http_status = status,
            model,
            duration_ms = start.elapsed().as_millis() as u64,
            "provider request succeeded"
        );
        Ok(content.to_string())
    }

    fn name(&self) -> &str {
        &self.cfg.provider_id
    }
}
