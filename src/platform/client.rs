//! HTTP capability used for player scripts and segment probes

use crate::config::ResolverConfig;
use crate::error::ResolveError;
use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Response};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Default user agent for script and probe requests
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// A fetched text resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    /// URL after transport-level redirects
    pub final_url: String,
    /// Header names are lowercase
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl FetchResponse {
    /// Header value by case-insensitive name
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// MIME type without parameters
    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
            .map(|value| value.split(';').next().unwrap_or(value).trim())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network access needed by the resolver
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// GET `url` as text; non-2xx statuses are returned, not raised
    async fn fetch_text(&self, url: &str, deadline: Instant) -> Result<FetchResponse, ResolveError>;

    /// HEAD `url` and return its headers with lowercase names
    async fn head(&self, url: &str, deadline: Instant) -> Result<HashMap<String, String>, ResolveError>;
}

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout
    pub timeout: Duration,
    /// User agent string
    pub user_agent: Option<String>,
    /// Proxy URL
    pub proxy_url: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            proxy_url: None,
        }
    }
}

impl From<&ResolverConfig> for HttpClientConfig {
    fn from(config: &ResolverConfig) -> Self {
        Self {
            timeout: config.script_timeout.max(config.probe_timeout),
            user_agent: config.user_agent.clone(),
            proxy_url: config.proxy_url.clone(),
        }
    }
}

/// reqwest-backed [`Fetcher`]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    config: HttpClientConfig,
}

impl HttpFetcher {
    /// Create a fetcher with default configuration
    pub fn new() -> Result<Self, ResolveError> {
        Self::with_config(HttpClientConfig::default())
    }

    /// Create a fetcher with custom configuration
    pub fn with_config(config: HttpClientConfig) -> Result<Self, ResolveError> {
        let mut builder = ClientBuilder::new()
            .timeout(config.timeout)
            .gzip(true)
            .brotli(true)
            .user_agent(config.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT));

        if let Some(proxy_url) = &config.proxy_url {
            let proxy = reqwest::Proxy::all(proxy_url)
                .map_err(|e| ResolveError::Config(format!("invalid proxy {}: {}", proxy_url, e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| ResolveError::Config(format!("HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &HttpClientConfig {
        &self.config
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_text(&self, url: &str, deadline: Instant) -> Result<FetchResponse, ResolveError> {
        debug!("GET {}", url);
        let request = async {
            let response = self.client.get(url).send().await.map_err(|e| fetch_error(url, e))?;
            let status = response.status().as_u16();
            let final_url = response.url().to_string();
            let headers = header_map(&response);
            let body = response.text().await.map_err(|e| fetch_error(url, e))?;
            Ok(FetchResponse {
                status,
                final_url,
                headers,
                body,
            })
        };

        tokio::time::timeout_at(deadline, request)
            .await
            .map_err(|_| ResolveError::Timeout(format!("GET {}", url)))?
    }

    async fn head(&self, url: &str, deadline: Instant) -> Result<HashMap<String, String>, ResolveError> {
        debug!("HEAD {}", url);
        let request = async {
            let response = self.client.head(url).send().await.map_err(|e| fetch_error(url, e))?;
            if !response.status().is_success() {
                return Err(ResolveError::Fetch {
                    url: url.to_string(),
                    reason: format!("HTTP {}", response.status()),
                });
            }
            Ok(header_map(&response))
        };

        tokio::time::timeout_at(deadline, request)
            .await
            .map_err(|_| ResolveError::Timeout(format!("HEAD {}", url)))?
    }
}

fn header_map(response: &Response) -> HashMap<String, String> {
    response
        .headers()
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_ascii_lowercase(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

fn fetch_error(url: &str, err: reqwest::Error) -> ResolveError {
    if err.is_timeout() {
        ResolveError::Timeout(format!("request to {}", url))
    } else {
        ResolveError::Fetch {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}
