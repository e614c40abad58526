//! Deadline-bounded regex execution.
//!
//! Searches run on a small dedicated pool of worker threads. The caller
//! waits for matches only until its deadline; after that it gets whatever
//! arrived so far and the search is abandoned. An abandoned search is not
//! interrupted: it keeps its worker until the regex finishes, but its
//! results are discarded.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use regex::{Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::error::{PkgNewsError, Result};

/// Maximum input length in characters.
pub const MAX_INPUT_CHARS: usize = 100_000;

/// Default number of regex worker threads.
pub const DEFAULT_WORKERS: usize = 2;

/// Matches delivered per search before the worker stops scanning.
const MAX_MATCHES_PER_SEARCH: usize = 10_000;

/// Compiled programs kept per engine.
const MAX_COMPILED_PATTERNS: usize = 256;

/// Compiled program size cap in bytes.
const REGEX_SIZE_LIMIT: usize = 1 << 20;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Regex compilation flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RegexFlags {
    /// `(?i)`
    pub case_insensitive: bool,
    /// `(?m)`
    pub multi_line: bool,
    /// `(?s)`
    pub dot_matches_new_line: bool,
}

impl RegexFlags {
    /// No flags.
    pub const NONE: RegexFlags = RegexFlags {
        case_insensitive: false,
        multi_line: false,
        dot_matches_new_line: false,
    };

    /// Case-insensitive matching.
    pub const IGNORE_CASE: RegexFlags = RegexFlags {
        case_insensitive: true,
        multi_line: false,
        dot_matches_new_line: false,
    };
}

/// A single match, detached from the haystack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegexMatch {
    /// Byte offset of the match start.
    pub start: usize,
    /// Byte offset of the match end.
    pub end: usize,
    /// Capture groups; index 0 is the whole match.
    pub groups: Vec<Option<String>>,
}

impl RegexMatch {
    /// The whole matched text.
    pub fn as_str(&self) -> &str {
        self.group(0).unwrap_or_default()
    }

    /// Capture group `index`, if it participated.
    pub fn group(&self, index: usize) -> Option<&str> {
        self.groups.get(index).and_then(|g| g.as_deref())
    }

    /// First capture group when the pattern has one, otherwise the whole match.
    pub fn candidate(&self) -> &str {
        if self.groups.len() > 1 {
            self.group(1).unwrap_or_default()
        } else {
            self.as_str()
        }
    }
}

/// Lazy, single-pass sequence of matches for one search.
///
/// Each call to `next` waits at most until the search deadline. Once the
/// deadline passes the sequence ends, possibly early.
#[derive(Debug)]
pub struct SafeMatches {
    rx: Option<Receiver<RegexMatch>>,
    deadline: Instant,
    timeout: Duration,
    timed_out: bool,
    refused: bool,
    truncated: Arc<AtomicBool>,
}

impl SafeMatches {
    /// A search that never ran.
    fn refused_search() -> Self {
        Self {
            rx: None,
            deadline: Instant::now(),
            timeout: Duration::ZERO,
            timed_out: false,
            refused: true,
            truncated: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the sequence ended because the deadline expired.
    pub fn timed_out(&self) -> bool {
        self.timed_out
    }

    /// Whether the search was refused without running.
    pub fn refused(&self) -> bool {
        self.refused
    }

    /// Whether the worker stopped at the per-search match cap.
    ///
    /// Only meaningful once the sequence has been drained.
    pub fn truncated(&self) -> bool {
        self.truncated.load(Ordering::Acquire)
    }

    /// Whether every match of the search was delivered.
    pub fn is_complete(&self) -> bool {
        !self.timed_out && !self.refused && !self.truncated()
    }

    fn expire(&mut self) {
        warn!(
            "Regex search exceeded {}ms, returning partial results",
            self.timeout.as_millis()
        );
        self.timed_out = true;
        self.rx = None;
    }
}

impl Iterator for SafeMatches {
    type Item = RegexMatch;

    fn next(&mut self) -> Option<RegexMatch> {
        let rx = self.rx.as_ref()?;

        // Already-delivered matches are handed out regardless of the deadline.
        match rx.try_recv() {
            Ok(m) => return Some(m),
            Err(TryRecvError::Disconnected) => {
                self.rx = None;
                return None;
            }
            Err(TryRecvError::Empty) => {}
        }

        let remaining = self.deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            self.expire();
            return None;
        }

        match rx.recv_timeout(remaining) {
            Ok(m) => Some(m),
            Err(RecvTimeoutError::Timeout) => {
                self.expire();
                None
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.rx = None;
                None
            }
        }
    }
}

struct Inner {
    jobs: Sender<Job>,
    compiled: Mutex<HashMap<(String, RegexFlags), Regex>>,
    submitted: AtomicU64,
}

impl Inner {
    fn submit(&self, job: Job) -> bool {
        self.submitted.fetch_add(1, Ordering::Relaxed);
        self.jobs.send(job).is_ok()
    }

    fn compiled(&self, pattern: &str, flags: RegexFlags) -> Result<Regex> {
        let key = (pattern.to_string(), flags);
        {
            let cache = self.compiled.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(re) = cache.get(&key) {
                return Ok(re.clone());
            }
        }

        let re = compile(pattern, flags)?;

        let mut cache = self.compiled.lock().unwrap_or_else(PoisonError::into_inner);
        if cache.len() >= MAX_COMPILED_PATTERNS {
            cache.clear();
        }
        cache.insert(key, re.clone());
        Ok(re)
    }
}

/// Compile `pattern` with the engine's size limits.
pub fn compile(pattern: &str, flags: RegexFlags) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(flags.case_insensitive)
        .multi_line(flags.multi_line)
        .dot_matches_new_line(flags.dot_matches_new_line)
        .size_limit(REGEX_SIZE_LIMIT)
        .dfa_size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| PkgNewsError::Validation(format!("invalid regex: {}", e)))
}

/// Whether `text` has more than `limit` characters.
///
/// Decided from the byte length alone unless the text is in the
/// ambiguous range where multi-byte characters matter.
pub(crate) fn exceeds_char_limit(text: &str, limit: usize) -> bool {
    if text.len() <= limit {
        false
    } else if text.len() > limit.saturating_mul(4) {
        true
    } else {
        text.chars().count() > limit
    }
}

/// Thread-safe regex runner with per-call deadlines.
///
/// Cloning is cheap; clones share the worker pool.
#[derive(Clone)]
pub struct RegexEngine {
    inner: Arc<Inner>,
    workers: usize,
}

impl std::fmt::Debug for RegexEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegexEngine")
            .field("workers", &self.workers)
            .field("submitted", &self.jobs_submitted())
            .finish()
    }
}

impl RegexEngine {
    /// Start an engine with `workers` dedicated threads.
    pub fn new(workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel::<Job>();
        let rx = Arc::new(Mutex::new(rx));

        for i in 0..workers {
            let rx = Arc::clone(&rx);
            thread::Builder::new()
                .name(format!("regex-worker-{}", i))
                .spawn(move || worker_loop(rx))?;
        }

        debug!("Started regex engine with {} workers", workers);

        Ok(Self {
            inner: Arc::new(Inner {
                jobs: tx,
                compiled: Mutex::new(HashMap::new()),
                submitted: AtomicU64::new(0),
            }),
            workers,
        })
    }

    /// Start an engine with the default worker count.
    pub fn with_default_workers() -> Result<Self> {
        Self::new(DEFAULT_WORKERS)
    }

    /// Number of searches handed to the worker pool so far.
    pub fn jobs_submitted(&self) -> u64 {
        self.inner.submitted.load(Ordering::Relaxed)
    }

    /// Search `text` for `pattern`, waiting at most `timeout`.
    ///
    /// Never fails: oversized input, compile errors and timeouts all yield
    /// an empty (or, for timeouts, partial) sequence and a log line.
    pub fn safe_find(
        &self,
        pattern: &str,
        text: &str,
        flags: RegexFlags,
        timeout: Duration,
    ) -> SafeMatches {
        if exceeds_char_limit(text, MAX_INPUT_CHARS) {
            warn!(
                "Text too long for regex processing: {} bytes (max {} chars)",
                text.len(),
                MAX_INPUT_CHARS
            );
            return SafeMatches::refused_search();
        }

        let (tx, rx) = mpsc::channel();
        let truncated = Arc::new(AtomicBool::new(false));
        let truncated_flag = Arc::clone(&truncated);
        let inner = Arc::clone(&self.inner);
        let pattern = pattern.to_string();
        let text = text.to_string();

        let job: Job = Box::new(move || {
            let re = match inner.compiled(&pattern, flags) {
                Ok(re) => re,
                Err(e) => {
                    warn!("Skipping regex {:?}: {}", truncate_pattern(&pattern), e);
                    return;
                }
            };

            for (index, caps) in re.captures_iter(&text).enumerate() {
                if index == MAX_MATCHES_PER_SEARCH {
                    truncated_flag.store(true, Ordering::Release);
                    return;
                }
                let Some(whole) = caps.get(0) else { continue };
                let found = RegexMatch {
                    start: whole.start(),
                    end: whole.end(),
                    groups: caps
                        .iter()
                        .map(|g| g.map(|m| m.as_str().to_string()))
                        .collect(),
                };
                // Receiver gone: the caller gave up or stopped reading.
                if tx.send(found).is_err() {
                    return;
                }
            }
        });

        if !self.inner.submit(job) {
            warn!("Regex worker pool is gone, returning no matches");
            return SafeMatches::refused_search();
        }

        SafeMatches {
            rx: Some(rx),
            deadline: Instant::now() + timeout,
            timeout,
            timed_out: false,
            refused: false,
            truncated,
        }
    }

    /// Run a search to completion or fail with `RegexTimeout`.
    ///
    /// Used where an incomplete answer is not acceptable, such as pattern
    /// validation.
    pub fn find_all(
        &self,
        pattern: &str,
        text: &str,
        flags: RegexFlags,
        timeout: Duration,
    ) -> Result<Vec<RegexMatch>> {
        let mut matches = self.safe_find(pattern, text, flags, timeout);
        let found: Vec<RegexMatch> = matches.by_ref().collect();
        if matches.timed_out() {
            return Err(PkgNewsError::RegexTimeout(timeout));
        }
        if matches.refused() {
            return Err(PkgNewsError::Validation(
                "regex search refused: input too long or engine stopped".to_string(),
            ));
        }
        Ok(found)
    }

    #[cfg(test)]
    pub(crate) fn submit_raw(&self, job: Job) {
        self.inner.submit(job);
    }
}

fn worker_loop(rx: Arc<Mutex<Receiver<Job>>>) {
    loop {
        let job = {
            let rx = rx.lock().unwrap_or_else(PoisonError::into_inner);
            rx.recv()
        };
        match job {
            Ok(job) => {
                if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                    warn!("Regex job panicked");
                }
            }
            // Engine dropped.
            Err(_) => return,
        }
    }
}

fn truncate_pattern(pattern: &str) -> String {
    pattern.chars().take(50).collect()
}
