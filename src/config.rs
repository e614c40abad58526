//! Configuration module for pkgnews.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::extract::extractor::DEFAULT_GENERIC_NAMES;
use crate::news::ssrf::validate_url;
use crate::news::types::{
    FeedSource, MAX_FEED_SIZE, MAX_ITEMS_PER_FEED, MAX_REDIRECTS, MAX_REQUESTS_PER_MINUTE,
    MAX_RETRIES,
};
use crate::{PkgNewsError, Result};

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Path to the log file. Empty disables file logging.
    #[serde(default)]
    pub file: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: String::new(),
        }
    }
}

/// Cache configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Directory holding cache entries.
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,
    /// Entry lifetime in hours.
    #[serde(default = "default_cache_ttl_hours")]
    pub ttl_hours: u64,
}

fn default_cache_dir() -> PathBuf {
    if let Some(xdg) = std::env::var_os("XDG_CACHE_HOME").filter(|v| !v.is_empty()) {
        return PathBuf::from(xdg).join("pkgnews");
    }
    match std::env::var_os("HOME").filter(|v| !v.is_empty()) {
        Some(home) => PathBuf::from(home).join(".cache").join("pkgnews"),
        None => PathBuf::from(".cache/pkgnews"),
    }
}

fn default_cache_ttl_hours() -> u64 {
    1
}

impl CacheConfig {
    /// Entry lifetime.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_hours.saturating_mul(3600))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            ttl_hours: default_cache_ttl_hours(),
        }
    }
}

/// Feed fetching configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Read timeout in seconds.
    #[serde(default = "default_read_timeout")]
    pub read_timeout_secs: u64,
    /// Maximum redirects followed per request.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Retries on transient HTTP statuses.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Maximum feed body size in bytes.
    #[serde(default = "default_max_feed_size")]
    pub max_feed_size_bytes: u64,
    /// Maximum entries kept per feed.
    #[serde(default = "default_max_items_per_feed")]
    pub max_items_per_feed: usize,
    /// Entries older than this many days are dropped (capped at 365).
    #[serde(default = "default_max_news_age_days")]
    pub max_news_age_days: u32,
    /// Feeds fetched in parallel.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Requests allowed per host per minute.
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,
    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_read_timeout() -> u64 {
    30
}

fn default_max_redirects() -> usize {
    3
}

fn default_max_retries() -> u32 {
    2
}

fn default_max_feed_size() -> u64 {
    MAX_FEED_SIZE
}

fn default_max_items_per_feed() -> usize {
    MAX_ITEMS_PER_FEED
}

fn default_max_news_age_days() -> u32 {
    30
}

fn default_max_workers() -> usize {
    5
}

fn default_rate_limit_per_minute() -> u32 {
    10
}

fn default_user_agent() -> String {
    format!("pkgnews/{}", env!("CARGO_PKG_VERSION"))
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            read_timeout_secs: default_read_timeout(),
            max_redirects: default_max_redirects(),
            max_retries: default_max_retries(),
            max_feed_size_bytes: default_max_feed_size(),
            max_items_per_feed: default_max_items_per_feed(),
            max_news_age_days: default_max_news_age_days(),
            max_workers: default_max_workers(),
            rate_limit_per_minute: default_rate_limit_per_minute(),
            user_agent: default_user_agent(),
        }
    }
}

/// Package extraction configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ExtractConfig {
    /// Extra regexes whose first capture group (or whole match) is a package name.
    #[serde(default)]
    pub custom_patterns: Vec<String>,
    /// Deadline for each pattern search in milliseconds (clamped to 1000..=2000).
    #[serde(default = "default_pattern_timeout_ms")]
    pub pattern_timeout_ms: u64,
    /// Packages whose mention always makes news relevant.
    #[serde(default = "default_critical_packages")]
    pub critical_packages: Vec<String>,
    /// Words never reported as package names.
    #[serde(default = "default_generic_names")]
    pub generic_names: Vec<String>,
}

fn default_pattern_timeout_ms() -> u64 {
    2000
}

fn default_critical_packages() -> Vec<String> {
    [
        "linux", "nvidia", "xorg", "systemd", "grub", "glibc", "gcc", "pacman",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_generic_names() -> Vec<String> {
    DEFAULT_GENERIC_NAMES.iter().map(|s| s.to_string()).collect()
}

impl ExtractConfig {
    pub fn pattern_timeout(&self) -> Duration {
        Duration::from_millis(self.pattern_timeout_ms)
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            custom_patterns: Vec::new(),
            pattern_timeout_ms: default_pattern_timeout_ms(),
            critical_packages: default_critical_packages(),
            generic_names: default_generic_names(),
        }
    }
}

fn default_feeds() -> Vec<FeedSource> {
    vec![
        FeedSource::news("Arch Linux News", "https://archlinux.org/feeds/news/"),
        FeedSource::news(
            "Arch Linux Security Advisories",
            "https://security.archlinux.org/advisory/feed.atom",
        ),
    ]
}

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Cache configuration.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Fetch configuration.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Extraction configuration.
    #[serde(default)]
    pub extract: ExtractConfig,
    /// Feeds to fetch.
    #[serde(default = "default_feeds")]
    pub feeds: Vec<FeedSource>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            cache: CacheConfig::default(),
            fetch: FetchConfig::default(),
            extract: ExtractConfig::default(),
            feeds: default_feeds(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(PkgNewsError::Io)?;
        Self::parse(&content)
    }

    /// Load configuration from a TOML file and apply environment variable overrides.
    pub fn load_with_env<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| PkgNewsError::Config(format!("config parse error: {e}")))
    }

    /// Apply environment variable overrides to the configuration.
    ///
    /// Supported environment variables:
    /// - `PKGNEWS_CACHE_DIR`: Override the cache directory
    /// - `PKGNEWS_LOG_LEVEL`: Override the log level
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("PKGNEWS_CACHE_DIR") {
            if !dir.is_empty() {
                self.cache.dir = PathBuf::from(dir);
            }
        }
        if let Ok(level) = std::env::var("PKGNEWS_LOG_LEVEL") {
            if !level.is_empty() {
                self.logging.level = level;
            }
        }
    }

    /// Validate the configuration.
    ///
    /// Returns an error if:
    /// - A feed has an empty name or a URL that is not a valid http(s) URL
    /// - `fetch.max_workers` is zero
    /// - `fetch.max_redirects`, `fetch.max_retries`, `fetch.max_feed_size_bytes`
    ///   or `fetch.rate_limit_per_minute` is above its hard limit
    /// - `fetch.max_feed_size_bytes` or `fetch.rate_limit_per_minute` is zero
    /// - `cache.ttl_hours` is zero
    pub fn validate(&self) -> Result<()> {
        for feed in &self.feeds {
            if feed.name.trim().is_empty() {
                return Err(PkgNewsError::Config(format!(
                    "feed with URL {} has no name",
                    feed.url
                )));
            }
            validate_url(&feed.url).map_err(|e| {
                PkgNewsError::Config(format!("feed {:?} has an invalid URL: {}", feed.name, e))
            })?;
        }
        if self.fetch.max_workers == 0 {
            return Err(PkgNewsError::Config(
                "fetch.max_workers must be at least 1".to_string(),
            ));
        }
        let fetch = &self.fetch;
        if fetch.max_redirects > MAX_REDIRECTS {
            return Err(PkgNewsError::Config(format!(
                "fetch.max_redirects must be at most {}",
                MAX_REDIRECTS
            )));
        }
        if fetch.max_retries > MAX_RETRIES {
            return Err(PkgNewsError::Config(format!(
                "fetch.max_retries must be at most {}",
                MAX_RETRIES
            )));
        }
        if fetch.max_feed_size_bytes == 0 || fetch.max_feed_size_bytes > MAX_FEED_SIZE {
            return Err(PkgNewsError::Config(format!(
                "fetch.max_feed_size_bytes must be between 1 and {}",
                MAX_FEED_SIZE
            )));
        }
        if fetch.rate_limit_per_minute == 0 || fetch.rate_limit_per_minute > MAX_REQUESTS_PER_MINUTE
        {
            return Err(PkgNewsError::Config(format!(
                "fetch.rate_limit_per_minute must be between 1 and {}",
                MAX_REQUESTS_PER_MINUTE
            )));
        }
        if self.cache.ttl_hours == 0 {
            return Err(PkgNewsError::Config(
                "cache.ttl_hours must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
