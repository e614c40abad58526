//! End-to-end tests for the feed fetch pipeline.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};

use common::{days_ago, fetch_context, rss_feed, rss_item, StubTransport};
use pkgnews::news::{sort_news, FeedType};
use pkgnews::{FeedSource, NewsItem};

const FEED_A: &str = "https://archlinux.org/feeds/news/";
const FEED_B: &str = "https://security.archlinux.org/advisory/feed.atom";
const FEED_C: &str = "https://forum.manjaro.org/c/announcements/stable-updates.rss";

fn titles(items: &[NewsItem]) -> Vec<&str> {
    items.iter().map(|i| i.title.as_str()).collect()
}

fn single_item_feed(title: &str, days: i64) -> String {
    rss_feed(
        "Feed",
        &[rss_item(
            title,
            &format!("https://example.com/{}", title.to_lowercase()),
            Some(&days_ago(days)),
            "",
        )],
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failing_feed_does_not_abort_batch() {
    let transport = Arc::new(
        StubTransport::new()
            .body(FEED_A, single_item_feed("First", 1))
            .fail(FEED_B, "connection refused")
            .body(FEED_C, single_item_feed("Third", 2)),
    );
    let (_tmp, ctx) = fetch_context(transport.clone());

    let feeds = vec![
        FeedSource::news("One", FEED_A),
        FeedSource::news("Two", FEED_B),
        FeedSource::news("Three", FEED_C),
    ];
    let items = ctx.fetch_all_feeds(&feeds).await;

    assert_eq!(titles(&items), ["First", "Third"]);
    assert_eq!(transport.requests().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_unparseable_feed_is_isolated() {
    let transport = Arc::new(
        StubTransport::new()
            .body(FEED_A, single_item_feed("Good", 1))
            .body(FEED_B, "definitely not a feed"),
    );
    let (_tmp, ctx) = fetch_context(transport);

    let items = ctx
        .fetch_all_feeds(&[FeedSource::news("Good", FEED_A), FeedSource::news("Bad", FEED_B)])
        .await;
    assert_eq!(titles(&items), ["Good"]);
}

#[test]
fn test_sort_priority_then_newest_first() {
    let make = |title: &str, priority: i32, y: i32, m: u32, d: u32| NewsItem {
        title: title.to_string(),
        link: format!("https://example.com/{}", title),
        publish_date: Utc.with_ymd_and_hms(y, m, d, 0, 0, 0).unwrap(),
        content: String::new(),
        source: "Feed".to_string(),
        priority,
        source_type: FeedType::News,
        affected_packages: Default::default(),
    };

    let mut items = vec![
        make("A", 1, 2024, 1, 1),
        make("B", 1, 2024, 6, 1),
        make("C", 2, 2099, 1, 1),
    ];
    sort_news(&mut items);
    assert_eq!(titles(&items), ["B", "A", "C"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_merged_results_sorted_across_feeds() {
    let transport = Arc::new(
        StubTransport::new()
            .body(FEED_A, single_item_feed("A", 20))
            .body(FEED_B, single_item_feed("B", 5))
            .body(
                FEED_C,
                rss_feed(
                    "Feed",
                    &[rss_item(
                        "C",
                        "https://example.com/c",
                        Some("Thu, 01 Jan 2099 00:00:00 +0000"),
                        "",
                    )],
                ),
            ),
    );
    let (_tmp, ctx) = fetch_context(transport);

    let feeds = vec![
        FeedSource::news("Low", FEED_C).with_priority(2),
        FeedSource::news("Older", FEED_A).with_priority(1),
        FeedSource::news("Newer", FEED_B).with_priority(1),
    ];

    for _ in 0..3 {
        let items = ctx.fetch_all_feeds(&feeds).await;
        assert_eq!(titles(&items), ["B", "A", "C"]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_only_enabled_news_feeds_fetched() {
    let transport = Arc::new(
        StubTransport::new()
            .body(FEED_A, single_item_feed("News", 1))
            .body(FEED_B, single_item_feed("Disabled", 1))
            .body(FEED_C, single_item_feed("Packages", 1)),
    );
    let (_tmp, ctx) = fetch_context(transport.clone());

    let feeds = vec![
        FeedSource::news("News", FEED_A),
        FeedSource::news("Disabled", FEED_B).disabled(),
        FeedSource::news("Packages", FEED_C).with_type(FeedType::Package),
    ];
    let items = ctx.fetch_all_feeds(&feeds).await;

    assert_eq!(titles(&items), ["News"]);
    assert_eq!(transport.requests(), vec![FEED_A.to_string()]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_feeds_fetched_in_parallel() {
    let urls: Vec<String> = (0..5)
        .map(|i| format!("https://mirror{}.example.com/feed.xml", i))
        .collect();
    let mut transport = StubTransport::new();
    for (i, url) in urls.iter().enumerate() {
        transport = transport.delayed(
            url,
            Duration::from_millis(300),
            single_item_feed(&format!("Item{}", i), 1),
        );
    }
    let (_tmp, ctx) = fetch_context(Arc::new(transport));

    let feeds: Vec<FeedSource> = urls
        .iter()
        .enumerate()
        .map(|(i, url)| FeedSource::news(format!("Mirror {}", i), url.clone()))
        .collect();

    let started = Instant::now();
    let items = ctx.fetch_all_feeds(&feeds).await;

    assert_eq!(items.len(), 5);
    assert!(started.elapsed() < Duration::from_millis(1200));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_second_cycle_served_from_cache() {
    let transport = Arc::new(StubTransport::new().body(FEED_A, single_item_feed("Cached", 1)));
    let (_tmp, ctx) = fetch_context(transport.clone());
    let feeds = vec![FeedSource::news("Arch", FEED_A)];

    let first = ctx.fetch_all_feeds(&feeds).await;
    let second = ctx.fetch_all_feeds(&feeds).await;

    assert_eq!(first, second);
    assert_eq!(transport.requests().len(), 1);
    assert!(ctx.cache().is_valid(FEED_A));
}

#[tokio::test]
async fn test_xxe_document_rejected_without_parsing() {
    // Unclosed on purpose: if it reached the parser the fetch would fail
    // with a parsing error instead of returning no entries.
    let hostile = r#"<?xml version="1.0"?>
<!DOCTYPE rss [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<rss version="2.0"><channel><title>&xxe;</title>
<item><title>&xxe;</title><link>https://example.com/x</link>"#;

    let transport = Arc::new(StubTransport::new().body(FEED_A, hostile));
    let (_tmp, ctx) = fetch_context(transport);

    let items = ctx
        .fetch_feed(&FeedSource::news("Hostile", FEED_A))
        .await
        .unwrap();

    assert!(items.is_empty());
    assert_eq!(ctx.documents_parsed(), 0);
    assert!(!ctx.cache().is_valid(FEED_A));
}

#[tokio::test]
async fn test_bare_path_entity_rejected_without_parsing() {
    let hostile = r#"<?xml version="1.0"?>
<!DOCTYPE rss [<!ENTITY xxe SYSTEM "/etc/passwd">]>
<rss version="2.0"><channel><title>&xxe;</title>
<item><title>&xxe;</title><link>https://example.com/x</link></item>
</channel></rss>"#;

    let transport = Arc::new(StubTransport::new().body(FEED_A, hostile));
    let (_tmp, ctx) = fetch_context(transport);

    let items = ctx
        .fetch_feed(&FeedSource::news("Hostile", FEED_A))
        .await
        .unwrap();

    assert!(items.is_empty());
    assert_eq!(ctx.documents_parsed(), 0);

    let report = ctx.test_feed(FEED_A).await;
    assert!(!report.success);
    assert_eq!(ctx.documents_parsed(), 0);
}

#[tokio::test]
async fn test_summary_sanitized_end_to_end() {
    let xml = rss_feed(
        "Feed",
        &[rss_item(
            "glibc update",
            "https://archlinux.org/news/glibc/",
            Some(&days_ago(1)),
            "&lt;p&gt;Run &lt;code&gt;pacman -Syu&lt;/code&gt; &amp;amp; reboot&lt;script&gt;x()&lt;/script&gt;&lt;/p&gt;",
        )],
    );
    let transport = Arc::new(StubTransport::new().body(FEED_A, xml));
    let (_tmp, ctx) = fetch_context(transport);

    let items = ctx.fetch_feed(&FeedSource::news("Arch", FEED_A)).await.unwrap();
    assert_eq!(items[0].content, "Run pacman -Syu & rebootx()");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fetch_relevant_tags_and_filters() {
    let xml = rss_feed(
        "Feed",
        &[
            rss_item(
                "firefox 130 drops X11 fallback",
                "https://example.com/firefox",
                Some(&days_ago(1)),
                "",
            ),
            rss_item(
                "New wiki theme",
                "https://example.com/wiki",
                Some(&days_ago(2)),
                "Purely cosmetic",
            ),
            rss_item(
                "Kernel regression",
                "https://example.com/linux",
                Some(&days_ago(3)),
                "The linux package rolls back a patch",
            ),
        ],
    );
    let transport = Arc::new(StubTransport::new().body(FEED_A, xml));
    let (_tmp, ctx) = fetch_context(transport);

    let installed: HashSet<String> = ["firefox", "linux", "vim"].iter().map(|s| s.to_string()).collect();
    let critical: HashSet<String> = ["linux"].iter().map(|s| s.to_string()).collect();
    let excluded = pkgnews::extract::default_generic_names();

    let items = ctx
        .fetch_relevant(&[FeedSource::news("Arch", FEED_A)], &installed, &critical, &excluded)
        .await;

    assert_eq!(
        titles(&items),
        ["firefox 130 drops X11 fallback", "Kernel regression"]
    );
    assert!(items[0].affected_packages.contains("firefox"));
    assert!(items[1].affected_packages.contains("linux"));

    // The cache keeps untagged items
    let cached: Vec<NewsItem> = ctx.cache().get(FEED_A).unwrap();
    assert!(cached.iter().all(|item| item.affected_packages.is_empty()));
}
