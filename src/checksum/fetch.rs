//! Source-item fetchers.

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use std::time::Duration;
use url::Url;

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Reads the full content behind `reference`. Failures are `Error::Fetch`.
    async fn fetch_bytes(&self, reference: &str) -> Result<Bytes>;
    fn name(&self) -> &'static str;
}

/// Reads local files, given either a plain path or a `file://` URL.
#[derive(Debug, Clone, Default)]
pub struct FileFetcher;

impl FileFetcher {
    pub fn new() -> Self {
        Self
    }

    fn resolve(reference: &str) -> Result<PathBuf> {
        if reference.starts_with("file:") {
            let url = Url::parse(reference).map_err(|e| Error::fetch(reference, e.to_string()))?;
            url.to_file_path()
                .map_err(|_| Error::fetch(reference, "not a local file URL"))
        } else {
            Ok(PathBuf::from(reference))
        }
    }
}

#[async_trait]
impl SourceFetcher for FileFetcher {
    async fn fetch_bytes(&self, reference: &str) -> Result<Bytes> {
        let path = Self::resolve(reference)?;
        tokio::fs::read(&path)
            .await
            .map(Bytes::from)
            .map_err(|e| Error::fetch(reference, e.to_string()))
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// Downloads `http(s)://` references.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                Error::configuration_with_context(
                    format!("failed to build HTTP client: {}", e),
                    crate::ErrorContext::new().with_source("http_fetcher"),
                )
            })?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SourceFetcher for HttpFetcher {
    async fn fetch_bytes(&self, reference: &str) -> Result<Bytes> {
        let resp = self
            .client
            .get(reference)
            .send()
            .await
            .map_err(|e| Error::fetch(reference, e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Error::fetch(
                reference,
                format!("HTTP {}", resp.status().as_u16()),
            ));
        }
        resp.bytes()
            .await
            .map_err(|e| Error::fetch(reference, e.to_string()))
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Picks the HTTP fetcher for `http`/`https` references and the file fetcher otherwise.
pub struct DefaultFetcher {
    http: HttpFetcher,
    file: FileFetcher,
}

impl DefaultFetcher {
    pub fn new(http_timeout: Duration) -> Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(http_timeout)?,
            file: FileFetcher::new(),
        })
    }
}

#[async_trait]
impl SourceFetcher for DefaultFetcher {
    async fn fetch_bytes(&self, reference: &str) -> Result<Bytes> {
        match Url::parse(reference) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                self.http.fetch_bytes(reference).await
            }
            _ => self.file.fetch_bytes(reference).await,
        }
    }

    fn name(&self) -> &'static str {
        "default"
    }
}

/// Serves bytes registered up front.
#[derive(Default)]
pub struct StaticFetcher {
    items: RwLock<HashMap<String, Bytes>>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, reference: impl Into<String>, bytes: impl Into<Bytes>) {
        if let Ok(mut items) = self.items.write() {
            items.insert(reference.into(), bytes.into());
        }
    }
}

#[async_trait]
impl SourceFetcher for StaticFetcher {
    async fn fetch_bytes(&self, reference: &str) -> Result<Bytes> {
        let items = self
            .items
            .read()
            .map_err(|_| Error::fetch(reference, "static fetcher poisoned"))?;
        items
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::fetch(reference, "no such item"))
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
