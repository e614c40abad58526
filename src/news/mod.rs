//! Distribution news feeds.
//!
//! This module fetches RSS/Atom feeds with SSRF, XXE and size protections,
//! caches the parsed items and filters them for relevance.

pub mod fetcher;
pub mod parse;
pub mod relevance;
pub mod sanitize;
pub mod ssrf;
pub mod transport;
pub mod types;
pub mod xxe;

pub use fetcher::{FetchContext, MAX_WORKERS};
pub use parse::ParseLimits;
pub use relevance::{critical_mentions, filter_relevant, has_critical_news, is_relevant};
pub use ssrf::{validate_url, GuardedResolver};
pub use transport::{FeedTransport, FetchedBody, HttpTransport};
pub use types::{
    sort_news, FeedSource, FeedTestReport, FeedType, NewsItem, MAX_FEED_SIZE, MAX_ITEMS_PER_FEED,
    MAX_NEWS_AGE_DAYS_CAP, MAX_REDIRECTS, MAX_REQUESTS_PER_MINUTE, MAX_RETRIES,
};
