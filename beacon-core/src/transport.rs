//! HTTP transport to the collector endpoint
//!
//! A delivery is a single `POST` of the encoded batch. The collector signals
//! acceptance through the response body, not the status code, so the
//! transport hands the raw body back and leaves the verdict to the buffer.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};

use crate::config::BufferConfig;
use crate::error::{Error, Result};

/// Sends one encoded batch and returns the response body
#[async_trait]
pub trait Transport: Send + Sync {
    /// Returns `Err` for anything that prevented reading a response body
    /// (connection refused, DNS failure, timeout).
    async fn post(&self, body: Vec<u8>) -> Result<String>;
}

/// reqwest-backed [`Transport`]
pub struct HttpTransport {
    http_client: reqwest::Client,
    url: String,
}

impl HttpTransport {
    /// Create a transport for `url` with a per-request `timeout`
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let url = url.into();
        reqwest::Url::parse(&url)
            .map_err(|e| Error::Config(format!("invalid server_url {:?}: {}", url, e)))?;

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { http_client, url })
    }

    /// Create a transport from buffer configuration
    ///
    /// Returns an error if the configuration is invalid or missing required fields.
    pub fn from_config(config: &BufferConfig) -> Result<Self> {
        config.validate()?;

        let url = config
            .server_url
            .clone()
            .ok_or_else(|| Error::Config("buffer.server_url is required".to_string()))?;

        Self::new(url, config.timeout())
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post(&self, body: Vec<u8>) -> Result<String> {
        let response = self
            .http_client
            .post(&self.url)
            .body(body)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::Transport(format!("failed to read response ({}): {}", status, e)))?;

        tracing::trace!(status = %status, body = %text, "Collector responded");
        Ok(text)
    }
}
