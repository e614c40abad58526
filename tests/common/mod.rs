//! Test helpers for integration tests.
//!
//! Provides a scripted feed transport, feed document builders and a fetch
//! context factory backed by a temporary cache directory.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use url::Url;

use pkgnews::news::{FeedTransport, FetchedBody};
use pkgnews::{CacheStore, FetchContext, PackageExtractor, PkgNewsError, RegexEngine, Result};

/// Canned reply for one URL.
#[derive(Clone)]
pub enum Reply {
    Body(String),
    Delayed(Duration, String),
    Fail(String),
}

/// Transport serving scripted replies instead of touching the network.
#[derive(Default)]
pub struct StubTransport {
    replies: HashMap<String, Reply>,
    requests: Mutex<Vec<String>>,
}

impl StubTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn body(mut self, url: &str, xml: impl Into<String>) -> Self {
        self.replies.insert(url.to_string(), Reply::Body(xml.into()));
        self
    }

    pub fn delayed(mut self, url: &str, delay: Duration, xml: impl Into<String>) -> Self {
        self.replies
            .insert(url.to_string(), Reply::Delayed(delay, xml.into()));
        self
    }

    pub fn fail(mut self, url: &str, message: &str) -> Self {
        self.replies
            .insert(url.to_string(), Reply::Fail(message.to_string()));
        self
    }

    /// URLs requested so far, in order.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl FeedTransport for StubTransport {
    async fn fetch(&self, url: &Url) -> Result<FetchedBody> {
        self.requests.lock().unwrap().push(url.to_string());

        let reply = self.replies.get(url.as_str()).cloned();
        match reply {
            Some(Reply::Body(xml)) => Ok(FetchedBody::new(xml, url.as_str())
                .with_content_type("application/rss+xml; charset=utf-8")),
            Some(Reply::Delayed(delay, xml)) => {
                tokio::time::sleep(delay).await;
                Ok(FetchedBody::new(xml, url.as_str()).with_content_type("application/rss+xml"))
            }
            Some(Reply::Fail(message)) => Err(PkgNewsError::Network(message)),
            None => Err(PkgNewsError::Network("HTTP error: 404 Not Found".to_string())),
        }
    }
}

/// One RSS `<item>`.
pub fn rss_item(title: &str, link: &str, pub_date: Option<&str>, description: &str) -> String {
    let date = pub_date
        .map(|d| format!("<pubDate>{}</pubDate>", d))
        .unwrap_or_default();
    format!(
        "<item><title>{}</title><link>{}</link>{}<description>{}</description></item>",
        title, link, date, description
    )
}

/// An RSS 2.0 document wrapping `items`.
pub fn rss_feed(title: &str, items: &[String]) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>{}</title>
    <link>https://archlinux.org/news/</link>
    <description>Test feed</description>
    {}
  </channel>
</rss>"#,
        title,
        items.join("\n    ")
    )
}

/// RFC 2822 date `days` before now.
pub fn days_ago(days: i64) -> String {
    (chrono::Utc::now() - chrono::Duration::days(days)).to_rfc2822()
}

/// A fetch context over `transport` with a fresh cache directory.
pub fn fetch_context(transport: Arc<StubTransport>) -> (TempDir, Arc<FetchContext>) {
    let tmp = TempDir::new().unwrap();
    let cache = CacheStore::new(tmp.path().join("cache"), Duration::from_secs(3600)).unwrap();
    let extractor = PackageExtractor::new(RegexEngine::new(2).unwrap());
    let ctx = FetchContext::with_transport(transport, cache, extractor);
    (tmp, Arc::new(ctx))
}
