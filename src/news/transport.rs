//! HTTP transport for feed retrieval.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Response, StatusCode};
use tracing::{debug, warn};
use url::Url;

use super::ssrf::{redirect_policy, resolve_public, GuardedResolver};
use super::types::{MAX_FEED_SIZE, MAX_REDIRECTS, MAX_RETRIES};
use crate::config::FetchConfig;
use crate::error::{PkgNewsError, Result};

/// Statuses worth retrying.
const RETRY_STATUSES: &[u16] = &[429, 500, 502, 503, 504, 520, 521, 522, 523, 524];

/// First retry delay; doubles on each further attempt.
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Idle connections kept per host.
const MAX_IDLE_PER_HOST: usize = 4;

/// A successfully retrieved response body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedBody {
    pub bytes: Vec<u8>,
    /// Lowercased `Content-Type` header, if sent.
    pub content_type: Option<String>,
    /// URL after redirects.
    pub final_url: String,
}

impl FetchedBody {
    pub fn new(bytes: impl Into<Vec<u8>>, final_url: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: None,
            final_url: final_url.into(),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into().to_lowercase());
        self
    }
}

/// Something that can retrieve a feed document.
///
/// The URL has already passed [`validate_url`](super::ssrf::validate_url)
/// and [`check_target`](super::ssrf::check_target).
#[async_trait]
pub trait FeedTransport: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedBody>;
}

/// Production transport built on a hardened reqwest client.
///
/// TLS certificates are verified, hosts resolve through [`GuardedResolver`]
/// and every redirect hop is re-checked.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    max_retries: u32,
    max_body_bytes: u64,
}

impl HttpTransport {
    /// Create a transport from fetch settings.
    ///
    /// Redirects, retries and body size are capped at [`MAX_REDIRECTS`],
    /// [`MAX_RETRIES`] and [`MAX_FEED_SIZE`] whatever the configuration says.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let max_redirects = config.max_redirects.min(MAX_REDIRECTS);
        let connect_timeout = Duration::from_secs(config.connect_timeout_secs);
        let read_timeout = Duration::from_secs(config.read_timeout_secs);

        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .read_timeout(read_timeout)
            .timeout(connect_timeout + read_timeout)
            .redirect(redirect_policy(max_redirects))
            .dns_resolver(Arc::new(GuardedResolver))
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| PkgNewsError::Network(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_retries: config.max_retries.min(MAX_RETRIES),
            max_body_bytes: config.max_feed_size_bytes.min(MAX_FEED_SIZE),
        })
    }

    async fn read_body(&self, mut response: Response) -> Result<FetchedBody> {
        let status = response.status();
        if status != StatusCode::OK {
            return Err(PkgNewsError::Network(format!("HTTP error: {}", status)));
        }

        if let Some(content_length) = response.content_length() {
            if content_length > self.max_body_bytes {
                return Err(too_large(content_length, self.max_body_bytes));
            }
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_lowercase());
        let final_url = response.url().to_string();

        let mut bytes = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| describe_error("failed to read response", &e))?
        {
            let total = (bytes.len() + chunk.len()) as u64;
            if total > self.max_body_bytes {
                return Err(too_large(total, self.max_body_bytes));
            }
            bytes.extend_from_slice(&chunk);
        }

        if bytes.is_empty() {
            return Err(PkgNewsError::Network(format!(
                "empty response from {}",
                final_url
            )));
        }

        Ok(FetchedBody {
            bytes,
            content_type,
            final_url,
        })
    }
}

#[async_trait]
impl FeedTransport for HttpTransport {
    async fn fetch(&self, url: &Url) -> Result<FetchedBody> {
        let host = url
            .host_str()
            .ok_or_else(|| PkgNewsError::Validation("URL has no host".to_string()))?;
        resolve_public(host, url.port_or_known_default().unwrap_or(443)).await?;

        let mut attempt = 0;
        loop {
            let response = self
                .client
                .get(url.clone())
                .send()
                .await
                .map_err(|e| describe_error("failed to fetch feed", &e))?;

            let status = response.status().as_u16();
            if RETRY_STATUSES.contains(&status) && attempt < self.max_retries {
                let delay = backoff(attempt);
                warn!(
                    "HTTP {} from {}, retrying in {}ms ({}/{})",
                    status,
                    url,
                    delay.as_millis(),
                    attempt + 1,
                    self.max_retries
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }

            debug!("HTTP {} from {}", status, url);
            return self.read_body(response).await;
        }
    }
}

/// Delay before retry number `attempt` (zero-based).
fn backoff(attempt: u32) -> Duration {
    BACKOFF_BASE * 2u32.saturating_pow(attempt)
}

fn too_large(size: u64, max: u64) -> PkgNewsError {
    PkgNewsError::Network(format!(
        "feed too large: {} bytes (max {} bytes)",
        size, max
    ))
}

/// Turn a reqwest error into a network error, keeping the cause chain.
fn describe_error(context: &str, err: &reqwest::Error) -> PkgNewsError {
    let kind = if err.is_timeout() {
        "request timed out"
    } else if err.is_redirect() {
        "redirect rejected"
    } else if err.is_connect() {
        "connection failed"
    } else {
        context
    };

    let mut message = format!("{}: {}", kind, err);
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    PkgNewsError::Network(message)
}
