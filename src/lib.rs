//! pkgnews - distribution news for the packages you have installed.
//!
//! Fetches distribution RSS/Atom feeds concurrently, caches them with expiry
//! and integrity checks, and finds the installed packages each item mentions
//! using deadline-bounded regex searches.

pub mod cache;
pub mod config;
pub mod error;
pub mod extract;
pub mod logging;
pub mod news;
pub mod rate_limit;

pub use cache::{CacheStats, CacheStore};
pub use config::Config;
pub use error::{PkgNewsError, Result};
pub use extract::{Extraction, PackageExtractor, RegexEngine};
pub use news::{FeedSource, FeedTestReport, FeedTransport, FeedType, FetchContext, NewsItem};
pub use rate_limit::{HostRateLimiter, RateLimitConfig};
