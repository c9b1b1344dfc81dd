use async_trait::async_trait;
use reqwest::{header, Client, StatusCode, Url};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use super::error::CatalogError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One provider exchange, fully resolved.
#[derive(Clone)]
pub struct ProviderRequest {
    pub method: Method,
    pub url: Url,
    pub bearer: String,
    pub body: Option<Value>,
}

impl fmt::Debug for ProviderRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRequest")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: StatusCode,
    /// Raw `Retry-After` header, if any.
    pub retry_after: Option<String>,
    pub body: String,
}

impl ProviderResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }

    pub fn with_retry_after(mut self, value: impl Into<String>) -> Self {
        self.retry_after = Some(value.into());
        self
    }
}

/// Sends a single request to the provider. Retrying and admission are the
/// caller's business.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: ProviderRequest) -> Result<ProviderResponse, CatalogError>;
}

#[derive(Clone)]
pub struct HttpTransport {
    http: Client,
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport").finish_non_exhaustive()
    }
}

impl HttpTransport {
    pub fn new() -> Result<Self, CatalogError> {
        let http = Client::builder()
            .user_agent("release-watchbot/0.1")
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: ProviderRequest) -> Result<ProviderResponse, CatalogError> {
        let builder = match request.method {
            Method::Get => self.http.get(request.url),
            Method::Post => self.http.post(request.url),
        };
        let builder = builder.bearer_auth(&request.bearer);
        let builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        };

        let res = builder.send().await?;
        let status = res.status();
        let retry_after = res
            .headers()
            .get(header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let body = res.text().await?;
        Ok(ProviderResponse {
            status,
            retry_after,
            body,
        })
    }
}
