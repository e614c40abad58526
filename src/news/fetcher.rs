//! Concurrent feed fetcher.
//!
//! [`FetchContext`] bundles everything one fetch cycle needs: the transport,
//! the cache, the per-host rate limiter and the package extractor. A feed goes
//! through URL validation, cache lookup, SSRF checks, rate limiting, retrieval,
//! an XXE scan and parsing, in that order. [`FetchContext::fetch_all_feeds`]
//! runs feeds on a bounded pool and merges the results.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};
use url::Url;

use super::parse::{extract_items, feed_title, parse_document, ParseLimits};
use super::relevance;
use super::ssrf::{check_target, validate_url};
use super::transport::{FeedTransport, FetchedBody, HttpTransport};
use super::types::{sort_news, FeedSource, FeedTestReport, NewsItem, MAX_REQUESTS_PER_MINUTE};
use super::xxe;
use crate::cache::CacheStore;
use crate::config::Config;
use crate::error::{PkgNewsError, Result};
use crate::extract::{PackageExtractor, RegexEngine};
use crate::logging::SECURITY_TARGET;
use crate::rate_limit::{HostRateLimiter, RateLimitConfig, RateLimitResult};

/// Upper bound on feeds fetched at once.
pub const MAX_WORKERS: usize = 5;

/// Content types a feed is expected to be served with.
const EXPECTED_CONTENT_TYPES: &[&str] = &[
    "application/rss+xml",
    "application/atom+xml",
    "application/xml",
    "text/xml",
    "text/html",
];

/// Bytes inspected by the response heuristics.
const PREVIEW_BYTES: usize = 1000;

/// Shared state for fetching feeds.
pub struct FetchContext {
    transport: Arc<dyn FeedTransport>,
    cache: CacheStore,
    limiter: HostRateLimiter,
    extractor: PackageExtractor,
    limits: ParseLimits,
    max_workers: usize,
    documents_parsed: AtomicU64,
}

impl std::fmt::Debug for FetchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchContext")
            .field("cache", &self.cache)
            .field("limits", &self.limits)
            .field("max_workers", &self.max_workers)
            .finish_non_exhaustive()
    }
}

impl FetchContext {
    /// Build a context with the HTTP transport from configuration.
    pub fn new(config: &Config) -> Result<Self> {
        let transport = HttpTransport::new(&config.fetch)?;
        let cache = CacheStore::new(&config.cache.dir, config.cache.ttl())?;

        let mut extractor = PackageExtractor::new(RegexEngine::with_default_workers()?)
            .with_pattern_timeout(config.extract.pattern_timeout());
        let accepted = extractor.add_custom_patterns(&config.extract.custom_patterns);
        if accepted < config.extract.custom_patterns.len() {
            warn!(
                "Accepted {} of {} custom patterns",
                accepted,
                config.extract.custom_patterns.len()
            );
        }

        Ok(Self::with_transport(Arc::new(transport), cache, extractor)
            .with_limits(ParseLimits::new(
                config.fetch.max_news_age_days,
                config.fetch.max_items_per_feed,
            ))
            .with_rate_limit(RateLimitConfig::new(
                config
                    .fetch
                    .rate_limit_per_minute
                    .clamp(1, MAX_REQUESTS_PER_MINUTE),
                60,
            ))
            .with_max_workers(config.fetch.max_workers))
    }

    /// Build a context around any transport, with default limits.
    pub fn with_transport(
        transport: Arc<dyn FeedTransport>,
        cache: CacheStore,
        extractor: PackageExtractor,
    ) -> Self {
        Self {
            transport,
            cache,
            limiter: HostRateLimiter::default(),
            extractor,
            limits: ParseLimits::default(),
            max_workers: MAX_WORKERS,
            documents_parsed: AtomicU64::new(0),
        }
    }

    pub fn with_limits(mut self, limits: ParseLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.limiter = HostRateLimiter::new(config);
        self
    }

    /// Set the pool size, clamped to `1..=MAX_WORKERS`.
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.clamp(1, MAX_WORKERS);
        self
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn extractor(&self) -> &PackageExtractor {
        &self.extractor
    }

    pub fn rate_limiter(&self) -> &HostRateLimiter {
        &self.limiter
    }

    /// How many documents have been handed to the feed parser.
    pub fn documents_parsed(&self) -> u64 {
        self.documents_parsed.load(Ordering::Relaxed)
    }

    /// Fetch one feed, using the cache when it holds a fresh copy.
    pub async fn fetch_feed(&self, source: &FeedSource) -> Result<Vec<NewsItem>> {
        let url = validate_url(&source.url)?;

        if let Some(items) = self.cache.get::<Vec<NewsItem>>(&source.url) {
            debug!("Using cached data for feed: {}", source.name);
            return Ok(items);
        }

        info!("Fetching feed: {}", source.name);
        let body = self.retrieve(&source.name, &url).await?;

        if let Some(signature) = xxe::scan(&body.bytes) {
            warn!(
                target: SECURITY_TARGET,
                event = "xxe_rejected",
                feed = %source.name,
                url = %source.url,
                reason = signature,
                "Potentially malicious XML content detected, rejecting feed"
            );
            return Ok(Vec::new());
        }

        self.documents_parsed.fetch_add(1, Ordering::Relaxed);
        let feed = parse_document(&body.bytes, &source.name, &source.url)?;
        let items = extract_items(feed, source, self.limits, Utc::now());

        if let Err(e) = self.cache.set(&source.url, &items) {
            warn!("Failed to cache feed {}: {}", source.name, e);
        }

        debug!("Parsed {} items from {}", items.len(), source.name);
        Ok(items)
    }

    /// Fetch every enabled news feed and merge the results.
    ///
    /// At most `min(feeds, max_workers)` feeds run at once, each on its own
    /// task. A failing feed is logged and contributes nothing. The result is
    /// sorted by priority, then newest first.
    pub async fn fetch_all_feeds(self: &Arc<Self>, feeds: &[FeedSource]) -> Vec<NewsItem> {
        self.limiter.cleanup();

        let selected: Vec<FeedSource> = feeds
            .iter()
            .filter(|feed| feed.is_fetchable())
            .cloned()
            .collect();
        if selected.is_empty() {
            info!("No enabled news feeds to fetch");
            return Vec::new();
        }

        let workers = selected.len().min(self.max_workers);
        let total = selected.len();
        let mut results = stream::iter(selected.into_iter().map(|feed| {
            let ctx = Arc::clone(self);
            tokio::spawn(async move {
                let outcome = ctx.fetch_feed(&feed).await;
                (feed.name, outcome)
            })
        }))
        .buffer_unordered(workers);

        let mut all_news = Vec::new();
        let mut failed = 0;
        while let Some(joined) = results.next().await {
            match joined {
                Ok((name, Ok(items))) => {
                    info!("Fetched {} items from {}", items.len(), name);
                    all_news.extend(items);
                }
                Ok((name, Err(e))) => {
                    error!("Failed to fetch feed {}: {}", name, e);
                    failed += 1;
                }
                Err(e) => {
                    error!("Feed task failed: {}", e);
                    failed += 1;
                }
            }
        }

        sort_news(&mut all_news);
        info!(
            "Fetched {} news items from {} feeds ({} failed)",
            all_news.len(),
            total,
            failed
        );
        all_news
    }

    /// Fetch all feeds and keep the items relevant to this machine.
    ///
    /// Tagging waits on regex deadlines, so it runs on the blocking pool.
    pub async fn fetch_relevant(
        self: &Arc<Self>,
        feeds: &[FeedSource],
        installed: &HashSet<String>,
        critical: &HashSet<String>,
        excluded: &HashSet<String>,
    ) -> Vec<NewsItem> {
        let all_news = self.fetch_all_feeds(feeds).await;

        let extractor = self.extractor.clone();
        let installed = installed.clone();
        let critical = critical.clone();
        let excluded = excluded.clone();
        let tagging = tokio::task::spawn_blocking(move || {
            relevance::filter_relevant(all_news, &installed, &critical, &excluded, &extractor)
        });

        match tagging.await {
            Ok(items) => items,
            Err(e) => {
                error!("Relevance filtering task failed: {}", e);
                Vec::new()
            }
        }
    }

    /// Check that a URL serves a parseable feed. Bypasses the cache.
    pub async fn test_feed(&self, url: &str) -> FeedTestReport {
        match self.check_feed(url).await {
            Ok((entry_count, feed_title)) => FeedTestReport {
                success: true,
                error: None,
                entry_count,
                feed_title,
            },
            Err(e) => FeedTestReport {
                error: Some(e.to_string()),
                ..Default::default()
            },
        }
    }

    async fn check_feed(&self, url: &str) -> Result<(usize, Option<String>)> {
        let parsed = validate_url(url)?;
        let body = self.retrieve(url, &parsed).await?;

        if let Some(signature) = xxe::scan(&body.bytes) {
            warn!(
                target: SECURITY_TARGET,
                event = "xxe_rejected",
                url = %url,
                reason = signature,
                "Potentially malicious XML content detected during feed test"
            );
            return Err(PkgNewsError::Validation(format!(
                "potentially malicious XML content detected ({})",
                signature
            )));
        }

        self.documents_parsed.fetch_add(1, Ordering::Relaxed);
        let feed = parse_document(&body.bytes, url, url)?;
        Ok((feed.entries.len(), feed_title(&feed)))
    }

    /// SSRF checks, rate limiting and the transport call.
    async fn retrieve(&self, name: &str, url: &Url) -> Result<FetchedBody> {
        if let Err(e) = check_target(url) {
            warn!(
                target: SECURITY_TARGET,
                event = "ssrf_blocked",
                feed = %name,
                url = %url,
                reason = %e,
                "Feed target rejected"
            );
            return Err(e);
        }

        let host = url.host_str().unwrap_or_default();
        if let RateLimitResult::Denied { retry_after } = self.limiter.check_and_record(host) {
            warn!("Rate limit exceeded for {} (feed {})", host, name);
            return Err(PkgNewsError::RateLimited {
                host: host.to_string(),
                retry_after,
            });
        }

        let body = self.transport.fetch(url).await?;

        if body.final_url != url.as_str() {
            let redirected = validate_url(&body.final_url).and_then(|final_url| {
                check_target(&final_url)?;
                Ok(final_url)
            });
            if let Err(e) = redirected {
                warn!(
                    target: SECURITY_TARGET,
                    event = "redirect_blocked",
                    feed = %name,
                    url = %body.final_url,
                    reason = %e,
                    "Feed redirected to a disallowed target"
                );
                return Err(PkgNewsError::Network(format!(
                    "redirected to invalid URL {}: {}",
                    body.final_url, e
                )));
            }
        }

        inspect_body(name, &body);
        Ok(body)
    }
}

/// Log warnings for responses that do not look like feeds. Never rejects.
fn inspect_body(name: &str, body: &FetchedBody) {
    if let Some(content_type) = &body.content_type {
        if !EXPECTED_CONTENT_TYPES
            .iter()
            .any(|expected| content_type.contains(expected))
        {
            warn!("Unexpected content type for feed {}: {}", name, content_type);
        }
    }

    let end = body.bytes.len().min(PREVIEW_BYTES);
    let preview = String::from_utf8_lossy(&body.bytes[..end]).to_lowercase();

    if !["<rss", "<feed", "<?xml", "<rdf"]
        .iter()
        .any(|marker| preview.contains(marker))
    {
        warn!("Response for {} does not appear to be RSS/Atom content", name);
    }

    for pattern in ["<script", "javascript:", "vbscript:"] {
        if preview.contains(pattern) {
            warn!("Suspicious content pattern in {}: {}", name, pattern);
        }
    }
}
