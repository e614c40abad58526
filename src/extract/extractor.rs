//! Package-name extraction from free text.
//!
//! Three tiers feed one result set:
//!
//! 1. Direct: whole-word, case-insensitive search for every installed name.
//! 2. Pattern: the baseline grammar plus registered custom patterns, run
//!    through the bounded engine. A hit only counts if it names an
//!    installed package.
//! 3. Mention: narrow "package X" / `` `X` `` / `"X"` templates with the
//!    same gating.
//!
//! Generic words from the exclusion set are never reported.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{PkgNewsError, Result};
use crate::extract::engine::{self, exceeds_char_limit, RegexEngine, RegexFlags, MAX_INPUT_CHARS};

/// Longest package name considered.
pub const MAX_PACKAGE_NAME_LENGTH: usize = 100;

/// Longest custom pattern accepted.
pub const MAX_PATTERN_LENGTH: usize = 200;

/// Most entities reported for one text.
pub const MAX_ENTITIES: usize = 1000;

/// Text limit for the single-package mention check and version extraction.
pub const MAX_PROBE_TEXT_CHARS: usize = 50_000;

/// Most version pairs reported by [`PackageExtractor::extract_version_info`].
pub const MAX_VERSION_INFO: usize = 100;

/// Default deadline for pattern-tier searches.
pub const DEFAULT_PATTERN_TIMEOUT: Duration = Duration::from_secs(2);

/// Deadline for mention-tier searches.
const MENTION_TIMEOUT: Duration = Duration::from_secs(1);

/// Deadline a custom pattern must meet on the validation sample.
const VALIDATION_TIMEOUT: Duration = Duration::from_secs(1);

/// Baseline grammar. Bounded repetition only, no nested quantifiers.
const BASE_PATTERNS: &[&str] = &[
    // name followed by a version comparator
    r"\b([a-z0-9](?:[a-z0-9\-_.+]){1,48}[a-z0-9])\s*(?:>=?|<=?|==?)\s*[\d\-._]{1,20}\b",
    // bare name
    r"\b([a-z0-9](?:[a-z0-9\-_.+]){1,48}[a-z0-9])\b",
    // lib-prefixed name
    r"\blib([a-z0-9](?:[a-z0-9\-_.]){1,43}[a-z0-9])\b",
];

const MENTION_PATTERNS: &[&str] = &[
    r"package\s+([a-z0-9](?:[a-z0-9\-_.]){1,48}[a-z0-9])",
    r"([a-z0-9](?:[a-z0-9\-_.]){1,48}[a-z0-9])\s+package",
    r"`([a-z0-9](?:[a-z0-9\-_.]){1,48}[a-z0-9])`",
    r#""([a-z0-9](?:[a-z0-9\-_.]){1,48}[a-z0-9])""#,
];

const VERSION_PATTERN: &str =
    r"([a-z0-9](?:[a-z0-9\-_.+]){1,48}[a-z0-9])\s*(>=?|<=?|==?)\s*([\d](?:[\d\-._]){0,19})";

/// Common words that look like package names but never identify one.
pub const DEFAULT_GENERIC_NAMES: &[&str] = &[
    "package",
    "update",
    "version",
    "release",
    "driver",
    "security",
    "critical",
    "important",
    "bugfix",
];

/// The built-in exclusion set.
pub fn default_generic_names() -> HashSet<String> {
    DEFAULT_GENERIC_NAMES.iter().map(|s| s.to_string()).collect()
}

/// Outcome of one extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extraction {
    /// Installed packages mentioned in the text.
    pub packages: BTreeSet<String>,
    /// False when a search hit its deadline or its match cap, or the text
    /// was refused, so `packages` may be missing mentions.
    pub complete: bool,
}

/// Finds installed package names mentioned in text.
#[derive(Debug, Clone)]
pub struct PackageExtractor {
    engine: RegexEngine,
    custom_patterns: Vec<String>,
    pattern_timeout: Duration,
}

impl PackageExtractor {
    /// Create an extractor backed by `engine`.
    pub fn new(engine: RegexEngine) -> Self {
        Self {
            engine,
            custom_patterns: Vec::new(),
            pattern_timeout: DEFAULT_PATTERN_TIMEOUT,
        }
    }

    /// Set the pattern-tier deadline. Clamped to 1..=2 seconds.
    pub fn with_pattern_timeout(mut self, timeout: Duration) -> Self {
        self.pattern_timeout = timeout.clamp(Duration::from_secs(1), Duration::from_secs(2));
        self
    }

    /// Registered custom patterns.
    pub fn custom_patterns(&self) -> &[String] {
        &self.custom_patterns
    }

    /// Validate and register a custom pattern.
    ///
    /// The pattern must be at most 200 characters, compile, and finish the
    /// validation sample within one second.
    pub fn register_pattern(&mut self, pattern: &str) -> Result<()> {
        if pattern.chars().count() > MAX_PATTERN_LENGTH {
            return Err(PkgNewsError::Validation(format!(
                "pattern too long: {} chars (max {})",
                pattern.chars().count(),
                MAX_PATTERN_LENGTH
            )));
        }

        engine::compile(pattern, RegexFlags::IGNORE_CASE)?;

        match self.engine.find_all(
            pattern,
            &validation_sample(),
            RegexFlags::IGNORE_CASE,
            VALIDATION_TIMEOUT,
        ) {
            Ok(_) => {}
            Err(PkgNewsError::RegexTimeout(_)) => {
                return Err(PkgNewsError::Validation(format!(
                    "pattern too slow on sample input: {}",
                    pattern
                )));
            }
            Err(e) => return Err(e),
        }

        if !self.custom_patterns.iter().any(|p| p == pattern) {
            self.custom_patterns.push(pattern.to_string());
            debug!("Added custom pattern: {}", pattern);
        }
        Ok(())
    }

    /// Register several patterns, skipping invalid ones.
    ///
    /// Returns how many were accepted.
    pub fn add_custom_patterns<S: AsRef<str>>(&mut self, patterns: &[S]) -> usize {
        let mut accepted = 0;
        for pattern in patterns {
            match self.register_pattern(pattern.as_ref()) {
                Ok(()) => accepted += 1,
                Err(e) => warn!("Rejected custom pattern {:?}: {}", pattern.as_ref(), e),
            }
        }
        accepted
    }

    /// Installed packages mentioned in `text`.
    pub fn extract_package_names(
        &self,
        text: &str,
        installed: &HashSet<String>,
        excluded: &HashSet<String>,
    ) -> BTreeSet<String> {
        self.extract(text, installed, excluded).packages
    }

    /// Installed packages mentioned in `text`, with completeness.
    pub fn extract(
        &self,
        text: &str,
        installed: &HashSet<String>,
        excluded: &HashSet<String>,
    ) -> Extraction {
        if text.is_empty() {
            return Extraction {
                packages: BTreeSet::new(),
                complete: true,
            };
        }

        if exceeds_char_limit(text, MAX_INPUT_CHARS) {
            warn!(
                "Input text too long for extraction: {} bytes (max {} chars)",
                text.len(),
                MAX_INPUT_CHARS
            );
            return Extraction::default();
        }

        let text_lower = text.to_lowercase();
        let excluded: HashSet<String> = excluded.iter().map(|s| s.to_lowercase()).collect();

        // lowercase name -> installed spelling
        let known: HashMap<String, &String> = installed
            .iter()
            .filter(|name| !name.is_empty() && name.chars().count() <= MAX_PACKAGE_NAME_LENGTH)
            .map(|name| (name.to_lowercase(), name))
            .filter(|(lower, _)| !excluded.contains(lower))
            .collect();

        let mut found = BTreeSet::new();
        let mut complete = true;

        for (lower, name) in &known {
            if contains_whole_word(&text_lower, lower) {
                debug!("Found package by direct match: {}", name);
                found.insert((*name).clone());
            }
        }

        let patterns = BASE_PATTERNS
            .iter()
            .copied()
            .chain(self.custom_patterns.iter().map(String::as_str));
        for pattern in patterns {
            complete &= self.collect_known(
                pattern,
                &text_lower,
                RegexFlags::IGNORE_CASE,
                self.pattern_timeout,
                &known,
                &mut found,
            );
        }

        for pattern in MENTION_PATTERNS {
            complete &= self.collect_known(
                pattern,
                &text_lower,
                RegexFlags::NONE,
                MENTION_TIMEOUT,
                &known,
                &mut found,
            );
        }

        if found.len() > MAX_ENTITIES {
            warn!(
                "Too many packages found ({}), limiting to {}",
                found.len(),
                MAX_ENTITIES
            );
            found = found.into_iter().take(MAX_ENTITIES).collect();
        }

        if !complete {
            warn!("Package extraction incomplete: a pattern search was cut short");
        }
        debug!("Extracted {} package names from text", found.len());

        Extraction {
            packages: found,
            complete,
        }
    }

    /// Run one search and keep candidates that name a known package.
    ///
    /// Returns false if the search did not cover the whole text.
    fn collect_known(
        &self,
        pattern: &str,
        text: &str,
        flags: RegexFlags,
        timeout: Duration,
        known: &HashMap<String, &String>,
        found: &mut BTreeSet<String>,
    ) -> bool {
        let mut matches = self.engine.safe_find(pattern, text, flags, timeout);
        for m in matches.by_ref() {
            let candidate = m.candidate().trim().to_lowercase();
            if candidate.chars().count() > MAX_PACKAGE_NAME_LENGTH {
                continue;
            }
            if let Some(name) = known.get(&candidate) {
                if found.insert((*name).clone()) {
                    debug!("Found package by pattern: {}", name);
                }
            }
        }
        matches.is_complete()
    }

    /// Whether `package` appears in `text` as a whole word, ignoring case.
    pub fn is_package_mentioned(&self, text: &str, package: &str) -> bool {
        if text.is_empty() || package.is_empty() {
            return false;
        }
        if exceeds_char_limit(text, MAX_PROBE_TEXT_CHARS)
            || package.chars().count() > MAX_PACKAGE_NAME_LENGTH
        {
            warn!("Input too long for package mention check");
            return false;
        }
        contains_whole_word(&text.to_lowercase(), &package.to_lowercase())
    }

    /// `(package, "<op><version>")` pairs such as `("linux", ">=6.1")`.
    pub fn extract_version_info(
        &self,
        text: &str,
        excluded: &HashSet<String>,
    ) -> Vec<(String, String)> {
        if text.is_empty() {
            return Vec::new();
        }
        if exceeds_char_limit(text, MAX_PROBE_TEXT_CHARS) {
            warn!("Text too long for version extraction");
            return Vec::new();
        }

        let mut versions = Vec::new();
        let matches = self.engine.safe_find(
            VERSION_PATTERN,
            &text.to_lowercase(),
            RegexFlags::NONE,
            DEFAULT_PATTERN_TIMEOUT,
        );

        for m in matches {
            let (Some(package), Some(op), Some(version)) = (m.group(1), m.group(2), m.group(3))
            else {
                continue;
            };
            if excluded.contains(package) || package.len() > 50 || version.len() > 20 {
                continue;
            }
            debug!("Found version info: {} {} {}", package, op, version);
            versions.push((package.to_string(), format!("{}{}", op, version)));

            if versions.len() >= MAX_VERSION_INFO {
                warn!("Version info extraction reached limit ({})", MAX_VERSION_INFO);
                break;
            }
        }
        versions
    }
}

/// Whether `needle` occurs in `haystack` with no word character on either side.
///
/// Word characters are alphanumerics and `_`, as for regex `\b`.
pub(crate) fn contains_whole_word(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }
    haystack.match_indices(needle).any(|(start, _)| {
        let before = haystack[..start].chars().next_back();
        let after = haystack[start + needle.len()..].chars().next();
        !before.is_some_and(is_word_char) && !after.is_some_and(is_word_char)
    })
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Input every custom pattern must handle quickly.
fn validation_sample() -> String {
    format!(
        "linux 6.9.1-arch1 >= 6.0 requires manual intervention for `pacman` and \"glibc\" \
         package systemd lib32-glibc {} {}!",
        "a".repeat(2_000),
        "-_.".repeat(300)
    )
}
