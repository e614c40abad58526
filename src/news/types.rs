//! News feed types.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache::tagged_datetime;

/// Hard cap on the age window, regardless of configuration.
pub const MAX_NEWS_AGE_DAYS_CAP: u32 = 365;

/// Maximum entries kept from a single feed.
pub const MAX_ITEMS_PER_FEED: usize = 1000;

/// Maximum feed body size in bytes (10MB).
pub const MAX_FEED_SIZE: u64 = 10 * 1024 * 1024;

/// Most redirects followed for one request.
pub const MAX_REDIRECTS: usize = 3;

/// Most retries on transient HTTP statuses.
pub const MAX_RETRIES: u32 = 2;

/// Most requests sent to one host per minute.
pub const MAX_REQUESTS_PER_MINUTE: u32 = 10;

/// What a feed carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FeedType {
    /// Distribution news.
    #[default]
    News,
    /// Package update announcements.
    Package,
}

impl fmt::Display for FeedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedType::News => write!(f, "news"),
            FeedType::Package => write!(f, "package"),
        }
    }
}

/// A configured feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSource {
    /// Display name.
    pub name: String,
    /// Feed URL (http or https).
    pub url: String,
    /// Lower sorts first.
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(rename = "type", default)]
    pub feed_type: FeedType,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_priority() -> i32 {
    1
}

fn default_enabled() -> bool {
    true
}

impl FeedSource {
    /// An enabled news feed with priority 1.
    pub fn news(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            priority: default_priority(),
            feed_type: FeedType::News,
            enabled: true,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_type(mut self, feed_type: FeedType) -> Self {
        self.feed_type = feed_type;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether the batch fetcher should include this feed.
    pub fn is_fetchable(&self) -> bool {
        self.enabled && self.feed_type == FeedType::News
    }
}

/// A single news entry taken from a feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsItem {
    pub title: String,
    pub link: String,
    /// Publication time, or fetch time when the feed gave none.
    #[serde(with = "tagged_datetime")]
    pub publish_date: DateTime<Utc>,
    /// Summary reduced to plain text.
    pub content: String,
    /// Name of the feed this came from.
    pub source: String,
    pub priority: i32,
    pub source_type: FeedType,
    /// Installed packages the item mentions. Empty until relevance tagging.
    #[serde(default)]
    pub affected_packages: BTreeSet<String>,
}

impl NewsItem {
    /// Text used for package extraction.
    pub fn searchable_text(&self) -> String {
        format!("{} {}", self.title, self.content)
    }
}

/// Order items by priority, then newest first.
///
/// Ties fall back to source, link and title so the order does not depend on
/// which feed finished first.
pub fn sort_news(items: &mut [NewsItem]) {
    items.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| b.publish_date.cmp(&a.publish_date))
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| a.link.cmp(&b.link))
            .then_with(|| a.title.cmp(&b.title))
    });
}

/// Outcome of probing a feed URL.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FeedTestReport {
    pub success: bool,
    pub error: Option<String>,
    pub entry_count: usize,
    pub feed_title: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(title: &str, priority: i32, date: DateTime<Utc>) -> NewsItem {
        NewsItem {
            title: title.to_string(),
            link: format!("https://archlinux.org/news/{}/", title),
            publish_date: date,
            content: String::new(),
            source: "Arch News".to_string(),
            priority,
            source_type: FeedType::News,
            affected_packages: BTreeSet::new(),
        }
    }

    #[test]
    fn test_feed_source_defaults_from_toml() {
        let source: FeedSource = toml::from_str(
            r#"
name = "Arch News"
url = "https://archlinux.org/feeds/news/"
"#,
        )
        .unwrap();
        assert_eq!(source.priority, 1);
        assert_eq!(source.feed_type, FeedType::News);
        assert!(source.enabled);
    }

    #[test]
    fn test_feed_type_renamed_field() {
        let source: FeedSource = toml::from_str(
            r#"
name = "Packages"
url = "https://archlinux.org/feeds/packages/"
type = "package"
priority = 3
enabled = false
"#,
        )
        .unwrap();
        assert_eq!(source.feed_type, FeedType::Package);
        assert_eq!(source.priority, 3);
        assert!(!source.is_fetchable());
    }

    #[test]
    fn test_is_fetchable() {
        let news = FeedSource::news("a", "https://a.example.com/feed");
        assert!(news.is_fetchable());
        assert!(!news.clone().disabled().is_fetchable());
        assert!(!news.with_type(FeedType::Package).is_fetchable());
    }

    #[test]
    fn test_feed_type_display() {
        assert_eq!(FeedType::News.to_string(), "news");
        assert_eq!(FeedType::Package.to_string(), "package");
    }

    #[test]
    fn test_sort_priority_then_newest() {
        let mut items = vec![
            item("A", 1, Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
            item("C", 2, Utc.with_ymd_and_hms(2099, 1, 1, 0, 0, 0).unwrap()),
            item("B", 1, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()),
        ];
        sort_news(&mut items);
        let titles: Vec<_> = items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, ["B", "A", "C"]);
    }

    #[test]
    fn test_news_item_json_shape() {
        let mut news = item("kernel", 1, Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap());
        news.affected_packages.insert("linux".to_string());
        let value = serde_json::to_value(&news).unwrap();

        assert_eq!(value["publish_date"]["__datetime__"], "2024-06-01T00:00:00+00:00");
        assert_eq!(value["source_type"], "news");
        assert_eq!(value["affected_packages"][0], "linux");

        let back: NewsItem = serde_json::from_value(value).unwrap();
        assert_eq!(back, news);
    }

    #[test]
    fn test_searchable_text() {
        let mut news = item("Kernel", 1, Utc::now());
        news.content = "needs manual intervention".to_string();
        assert_eq!(news.searchable_text(), "Kernel needs manual intervention");
    }
}
