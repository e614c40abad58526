//! Decide which news items matter for this machine.

use std::collections::{BTreeSet, HashSet};

use tracing::{debug, info};

use super::types::NewsItem;
use crate::extract::PackageExtractor;

/// Words that make an item relevant regardless of packages.
pub const IMPORTANT_KEYWORDS: &[&str] = &[
    "breaking",
    "critical",
    "urgent",
    "security",
    "vulnerability",
    "exploit",
    "manual intervention",
];

/// Fill in `affected_packages` for every item.
///
/// Returns false if any extraction was cut short.
pub fn tag_affected(
    items: &mut [NewsItem],
    installed: &HashSet<String>,
    excluded: &HashSet<String>,
    extractor: &PackageExtractor,
) -> bool {
    let mut complete = true;
    for item in items.iter_mut() {
        let extraction = extractor.extract(&item.searchable_text(), installed, excluded);
        if !extraction.complete {
            debug!("Package extraction incomplete for {:?}", item.title);
            complete = false;
        }
        item.affected_packages = extraction.packages;
    }
    complete
}

/// Whether an already tagged item is worth showing.
pub fn is_relevant(
    item: &NewsItem,
    installed: &HashSet<String>,
    critical: &HashSet<String>,
) -> bool {
    if item.source.to_lowercase().contains("security") {
        return true;
    }

    if item
        .affected_packages
        .iter()
        .any(|pkg| installed.contains(pkg) || critical.contains(pkg))
    {
        return true;
    }

    let text = item.searchable_text().to_lowercase();
    IMPORTANT_KEYWORDS.iter().any(|keyword| text.contains(keyword))
}

/// Tag items with affected packages and keep the relevant ones.
///
/// Order is preserved.
pub fn filter_relevant(
    mut items: Vec<NewsItem>,
    installed: &HashSet<String>,
    critical: &HashSet<String>,
    excluded: &HashSet<String>,
    extractor: &PackageExtractor,
) -> Vec<NewsItem> {
    let total = items.len();
    tag_affected(&mut items, installed, excluded, extractor);
    items.retain(|item| is_relevant(item, installed, critical));
    info!("{} of {} news items are relevant", items.len(), total);
    items
}

/// Affected packages of `item` that are in the critical set.
pub fn critical_mentions(item: &NewsItem, critical: &HashSet<String>) -> BTreeSet<String> {
    item.affected_packages
        .iter()
        .filter(|pkg| critical.contains(*pkg))
        .cloned()
        .collect()
}

/// Whether any item comes from a security source or has an alarming title.
pub fn has_critical_news(items: &[NewsItem]) -> bool {
    items.iter().any(|item| {
        if item.source.to_lowercase().contains("security") {
            return true;
        }
        let title = item.title.to_lowercase();
        ["critical", "security", "urgent"]
            .iter()
            .any(|word| title.contains(word))
    })
}
