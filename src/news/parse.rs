//! Turn feed documents into news items.

use chrono::{DateTime, Duration, Utc};
use feed_rs::model::{Entry, Feed};
use feed_rs::parser;
use tracing::{debug, warn};

use super::sanitize::strip_html;
use super::types::{FeedSource, NewsItem, MAX_ITEMS_PER_FEED, MAX_NEWS_AGE_DAYS_CAP};
use crate::error::{PkgNewsError, Result};

/// Per-feed entry limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseLimits {
    /// Entries older than this are dropped.
    pub max_age: Duration,
    /// Processing stops after this many accepted entries.
    pub max_items: usize,
}

impl ParseLimits {
    /// Build limits, clamping age to one year and items to the global cap.
    pub fn new(max_age_days: u32, max_items: usize) -> Self {
        Self {
            max_age: Duration::days(i64::from(max_age_days.min(MAX_NEWS_AGE_DAYS_CAP))),
            max_items: max_items.min(MAX_ITEMS_PER_FEED),
        }
    }
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self::new(30, MAX_ITEMS_PER_FEED)
    }
}

/// Parse raw bytes into a feed document.
pub fn parse_document(bytes: &[u8], feed_name: &str, feed_url: &str) -> Result<Feed> {
    parser::parse(bytes).map_err(|e| {
        PkgNewsError::feed_parsing(format!("failed to parse feed: {}", e), feed_name, feed_url)
    })
}

/// The document's own title, if it has one.
pub fn feed_title(feed: &Feed) -> Option<String> {
    feed.title
        .as_ref()
        .map(|t| strip_html(&t.content))
        .filter(|t| !t.is_empty())
}

/// Convert entries to news items.
///
/// Entries without a title or link are skipped. Missing dates become `now`.
pub fn extract_items(
    feed: Feed,
    source: &FeedSource,
    limits: ParseLimits,
    now: DateTime<Utc>,
) -> Vec<NewsItem> {
    let mut items = Vec::new();

    for entry in feed.entries {
        let Some(item) = to_news_item(entry, source, now) else {
            debug!("Skipping entry without title or link in {}", source.name);
            continue;
        };

        if now.signed_duration_since(item.publish_date) > limits.max_age {
            debug!(
                "Skipping old entry from {} in {}",
                item.publish_date, source.name
            );
            continue;
        }

        items.push(item);

        if items.len() >= limits.max_items {
            warn!(
                "Feed {} reached max items limit ({}), stopping processing",
                source.name, limits.max_items
            );
            break;
        }
    }

    items
}

fn to_news_item(entry: Entry, source: &FeedSource, now: DateTime<Utc>) -> Option<NewsItem> {
    let title = entry
        .title
        .map(|t| strip_html(&t.content))
        .filter(|t| !t.is_empty())?;
    let link = entry
        .links
        .into_iter()
        .map(|l| l.href.trim().to_string())
        .find(|href| !href.is_empty())?;

    let content = entry
        .summary
        .map(|t| t.content)
        .or_else(|| entry.content.and_then(|c| c.body))
        .map(|body| strip_html(&body))
        .unwrap_or_default();

    Some(NewsItem {
        title,
        link,
        publish_date: entry.published.or(entry.updated).unwrap_or(now),
        content,
        source: source.name.clone(),
        priority: source.priority,
        source_type: source.feed_type,
        affected_packages: Default::default(),
    })
}
