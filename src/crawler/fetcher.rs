//! HTTP fetcher implementation
//!
//! This module handles the network side of a crawl:
//! - Building HTTP clients with the task's user agent, timeout and proxy
//! - GET requests that follow redirects
//! - Classifying every response or error into a [`FetchOutcome`]
//!
//! The fetcher does not touch shared crawl state; its return value drives
//! the downstream updates.

use crate::config::SpiderConfig;
use crate::CrawlError;
use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, redirect::Policy, Client, Proxy, StatusCode};
use std::time::Duration;
use url::Url;

/// Maximum redirect hops followed before giving up
const MAX_REDIRECTS: usize = 10;

/// Classified result of one fetch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// Page fetched with an accepted content type
    Success {
        status_code: u16,
        content_type: String,
        body: String,
        /// URL after redirects
        final_url: Url,
    },

    /// Timeout, connection error, 5xx or HTTP 429; worth retrying
    TransientFailure { reason: String },

    /// Other 4xx, redirect error or disallowed content type; never retried
    PermanentFailure { reason: String },
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientFailure { .. })
    }
}

/// Anything that can turn a URL into a [`FetchOutcome`]
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> FetchOutcome;
}

/// Client settings for one task run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchSettings {
    pub timeout: Duration,
    pub user_agent: String,
    pub proxy_url: Option<String>,
    /// Accepted content types, empty accepts every type
    pub content_types: Vec<String>,
}

impl FetchSettings {
    /// Builds settings from the global defaults and a task's content types
    pub fn from_config<'a, I>(spider: &SpiderConfig, content_types: I) -> Self
    where
        I: IntoIterator<Item = &'a String>,
    {
        Self {
            timeout: Duration::from_secs(spider.timeout_secs),
            user_agent: spider.user_agent.clone(),
            proxy_url: spider.proxy_url.clone().filter(|p| !p.trim().is_empty()),
            content_types: content_types.into_iter().cloned().collect(),
        }
    }
}

/// Builds an HTTP client with proper configuration
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Invalid proxy URL or client setup failure
pub fn build_http_client(settings: &FetchSettings) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(settings.user_agent.clone())
        .timeout(settings.timeout)
        .connect_timeout(settings.timeout.min(Duration::from_secs(10)))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = &settings.proxy_url {
        builder = builder.proxy(Proxy::all(proxy.as_str())?);
    }

    builder.build()
}

/// reqwest-backed [`PageFetcher`]
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    content_types: Vec<String>,
}

impl HttpFetcher {
    pub fn new(settings: &FetchSettings) -> Result<Self, CrawlError> {
        Ok(Self {
            client: build_http_client(settings)?,
            content_types: settings
                .content_types
                .iter()
                .map(|ct| ct.trim().to_ascii_lowercase())
                .collect(),
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    /// Fetches a URL and classifies the outcome
    ///
    /// | Condition | Outcome |
    /// |-----------|---------|
    /// | 2xx with accepted content type | Success |
    /// | HTTP 429, HTTP 5xx | Transient |
    /// | Timeout, connection error, body read error | Transient |
    /// | Other 4xx, unfollowed 3xx | Permanent |
    /// | Redirect loop or more than 10 hops | Permanent |
    /// | Content type not accepted | Permanent |
    async fn fetch(&self, url: &Url) -> FetchOutcome {
        let response = match self.client.get(url.as_str()).send().await {
            Ok(response) => response,
            Err(e) => return classify_error(&e),
        };

        let status = response.status();
        if let Some(outcome) = classify_status(status) {
            return outcome;
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if !content_type_allowed(&self.content_types, &content_type) {
            return FetchOutcome::PermanentFailure {
                reason: format!("content type '{}' not accepted", content_type),
            };
        }

        let final_url = response.url().clone();
        match response.text().await {
            Ok(body) => FetchOutcome::Success {
                status_code: status.as_u16(),
                content_type,
                body,
                final_url,
            },
            Err(e) => FetchOutcome::TransientFailure {
                reason: format!("failed to read body: {}", e),
            },
        }
    }
}

/// Maps a non-success status to an outcome, `None` for 2xx
fn classify_status(status: StatusCode) -> Option<FetchOutcome> {
    if status.is_success() {
        return None;
    }

    let reason = format!("HTTP {}", status.as_u16());
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Some(FetchOutcome::TransientFailure { reason })
    } else {
        Some(FetchOutcome::PermanentFailure { reason })
    }
}

fn classify_error(e: &reqwest::Error) -> FetchOutcome {
    if e.is_timeout() {
        FetchOutcome::TransientFailure {
            reason: "request timeout".to_string(),
        }
    } else if e.is_connect() {
        FetchOutcome::TransientFailure {
            reason: format!("connection error: {}", e),
        }
    } else if e.is_redirect() || e.is_builder() {
        FetchOutcome::PermanentFailure {
            reason: e.to_string(),
        }
    } else {
        FetchOutcome::TransientFailure {
            reason: e.to_string(),
        }
    }
}

/// Checks a Content-Type header value against the accepted list
///
/// Parameters after `;` are ignored. An entry matches the exact media type or
/// acts as a prefix (`text/` accepts every text type). An empty list or a
/// missing header accepts everything.
pub fn content_type_allowed(accepted: &[String], header: &str) -> bool {
    let essence = header
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    if accepted.is_empty() || essence.is_empty() {
        return true;
    }

    accepted.iter().any(|allowed| {
        let allowed = allowed.trim().to_ascii_lowercase();
        !allowed.is_empty() && essence.starts_with(&allowed)
    })
}
