//! Outbound HTTP fetch abstraction.
//!
//! `WebFetcher` is the seam services use for outbound calls, so callers can swap
//! a direct fetcher for one that goes through the API gateway (or a test double).
//!
//! - `InternalWebFetcher`: server-to-server, options applied as given.
//! - `ApiGatewayWebFetcher`: wraps `{uri, options}` in a JSON envelope and posts
//!   it to `<gateway>/real/api-gateway`. The gateway turns cookie-based client auth
//!   into header-based internal auth and performs the real call.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Method, StatusCode, redirect};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

pub const API_GATEWAY_PATH: &str = "/real/api-gateway";

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid uri: {0}")]
    InvalidUri(String),
    #[error("invalid method: {0}")]
    InvalidMethod(String),
    #[error("redirect refused (status {0})")]
    Redirected(StatusCode),
    #[error("could not encode gateway envelope: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    #[default]
    Cors,
    NoCors,
    SameOrigin,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    #[default]
    Default,
    NoStore,
    Reload,
    NoCache,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RedirectMode {
    #[default]
    Follow,
    Error,
    Manual,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Credentials {
    Omit,
    #[default]
    SameOrigin,
    Include,
}

/// Request options, serialized with the same field names a browser fetch uses so
/// the gateway can replay them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<RequestMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<RedirectMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referrer: Option<String>,
}

impl FetchOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post_json(body: &serde_json::Value) -> Self {
        let mut headers = BTreeMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());
        Self {
            method: Some("POST".to_string()),
            headers,
            body: Some(body.to_string()),
            ..Self::default()
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name.to_string(), value.to_string());
        self
    }
}

/// Body posted to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayEnvelope {
    pub uri: String,
    pub options: FetchOptions,
}

#[async_trait]
pub trait WebFetcher: Send + Sync + 'static {
    async fn fetch(&self, uri: &str, options: FetchOptions) -> Result<reqwest::Response, FetchError>;
}

#[derive(Clone, Debug)]
pub struct InternalWebFetcher {
    client: reqwest::Client,
    // Used when the caller asks for `redirect: error` or `manual`.
    no_redirect_client: reqwest::Client,
}

impl InternalWebFetcher {
    pub fn new() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder().build()?;
        let no_redirect_client = reqwest::Client::builder()
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            no_redirect_client,
        })
    }
}

#[async_trait]
impl WebFetcher for InternalWebFetcher {
    async fn fetch(&self, uri: &str, options: FetchOptions) -> Result<reqwest::Response, FetchError> {
        let url = Url::parse(uri).map_err(|_| FetchError::InvalidUri(uri.to_string()))?;

        let method = match options.method.as_deref() {
            None => Method::GET,
            Some(m) => Method::from_bytes(m.to_ascii_uppercase().as_bytes())
                .map_err(|_| FetchError::InvalidMethod(m.to_string()))?,
        };

        let redirect_mode = options.redirect.unwrap_or_default();
        let client = match redirect_mode {
            RedirectMode::Follow => &self.client,
            RedirectMode::Error | RedirectMode::Manual => &self.no_redirect_client,
        };

        let mut request = client.request(method, url);
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if matches!(options.cache, Some(CacheMode::NoCache | CacheMode::NoStore | CacheMode::Reload)) {
            request = request.header(reqwest::header::CACHE_CONTROL, "no-cache");
        }
        if let Some(body) = options.body {
            request = request.body(body);
        }

        let response = request.send().await?;

        if redirect_mode == RedirectMode::Error && response.status().is_redirection() {
            return Err(FetchError::Redirected(response.status()));
        }

        Ok(response)
    }
}

/// Routes every call through the API gateway.
pub struct ApiGatewayWebFetcher {
    gateway_url: String,
    inner: InternalWebFetcher,
}

impl ApiGatewayWebFetcher {
    pub fn new(api_gateway_host: &str) -> Result<Self, FetchError> {
        Ok(Self {
            gateway_url: format!("{}{}", api_gateway_host.trim_end_matches('/'), API_GATEWAY_PATH),
            inner: InternalWebFetcher::new()?,
        })
    }

    pub fn gateway_url(&self) -> &str {
        &self.gateway_url
    }

    fn gateway_options(envelope: &GatewayEnvelope) -> Result<FetchOptions, FetchError> {
        let body = serde_json::to_string(envelope)?;

        Ok(FetchOptions {
            method: Some("POST".to_string()),
            headers: BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())]),
            body: Some(body),
            mode: Some(RequestMode::Cors),
            cache: Some(CacheMode::NoCache),
            redirect: Some(RedirectMode::Error),
            credentials: Some(Credentials::Include),
            referrer: Some("client".to_string()),
        })
    }
}

#[async_trait]
impl WebFetcher for ApiGatewayWebFetcher {
    async fn fetch(&self, uri: &str, options: FetchOptions) -> Result<reqwest::Response, FetchError> {
        let envelope = GatewayEnvelope {
            uri: uri.to_string(),
            options,
        };

        let gateway_options = Self::gateway_options(&envelope)?;
        self.inner.fetch(&self.gateway_url, gateway_options).await
    }
}
