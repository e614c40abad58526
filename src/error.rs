//! Error types for pkgnews.

use std::time::Duration;

use thiserror::Error;

/// Common error type for pkgnews.
#[derive(Error, Debug)]
pub enum PkgNewsError {
    /// Pre-flight validation failure (bad URL, bad domain, bad pattern).
    #[error("validation error: {0}")]
    Validation(String),

    /// Network failure.
    ///
    /// Covers timeouts, refused connections, TLS failures, redirect limits,
    /// oversized or empty bodies and disallowed private targets.
    #[error("network error: {0}")]
    Network(String),

    /// Per-host request budget exhausted.
    #[error("network error: rate limit exceeded for {host} (retry in {}s)", .retry_after.as_secs())]
    RateLimited {
        /// Host that hit the limit.
        host: String,
        /// Time until the oldest request leaves the window.
        retry_after: Duration,
    },

    /// Feed document could not be parsed.
    #[error("{message} (feed: {feed_name}, url: {feed_url})")]
    FeedParsing {
        /// What went wrong.
        message: String,
        /// Configured feed name.
        feed_name: String,
        /// Configured feed URL.
        feed_url: String,
    },

    /// Cache write or directory failure.
    #[error("cache error: {0}")]
    Cache(String),

    /// Regex search exceeded its deadline.
    ///
    /// Only surfaced by pattern validation; searches absorb it.
    #[error("regex timed out after {}ms", .0.as_millis())]
    RegexTimeout(Duration),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl PkgNewsError {
    /// Build a parsing error tagged with the feed identity.
    pub fn feed_parsing(
        message: impl Into<String>,
        feed_name: impl Into<String>,
        feed_url: impl Into<String>,
    ) -> Self {
        PkgNewsError::FeedParsing {
            message: message.into(),
            feed_name: feed_name.into(),
            feed_url: feed_url.into(),
        }
    }
}

/// Result type alias for pkgnews operations.
pub type Result<T> = std::result::Result<T, PkgNewsError>;
