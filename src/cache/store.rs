//! Directory-backed cache store.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::envelope::{CacheEnvelope, CACHE_VERSION};
use crate::error::{PkgNewsError, Result};
use crate::logging::SECURITY_TARGET;

const ENTRY_EXTENSION: &str = "json";

/// Random salt for hashed fallback filenames, fixed for the life of the process.
fn process_salt() -> &'static str {
    static SALT: OnceLock<String> = OnceLock::new();
    SALT.get_or_init(|| {
        let bytes: [u8; 16] = rand::random();
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    })
}

/// State of an entry after reading it back.
enum EntryState {
    Fresh(CacheEnvelope),
    Expired,
    Corrupt(String),
    Tampered,
}

/// Summary of the cache directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub directory: PathBuf,
    pub ttl: Duration,
    pub file_count: usize,
    pub total_size: u64,
    pub expired_count: usize,
}

/// A TTL cache storing one JSON file per key.
///
/// Entries are written atomically (temp file in the same directory, then
/// rename) with owner-only permissions. Concurrent writers to the same key
/// do not corrupt each other; the last rename wins.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
    ttl: Duration,
}

impl CacheStore {
    /// Open (and create if needed) a cache directory.
    pub fn new(dir: impl Into<PathBuf>, ttl: Duration) -> Result<Self> {
        let store = Self {
            dir: dir.into(),
            ttl,
        };
        store.ensure_dir()?;
        debug!(
            "Initialized cache at {} with TTL {}s",
            store.dir.display(),
            ttl.as_secs()
        );
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            PkgNewsError::Cache(format!(
                "cannot access cache directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&self.dir, fs::Permissions::from_mode(0o700)) {
                warn!(
                    "Could not restrict cache directory {}: {}",
                    self.dir.display(),
                    e
                );
            }
        }

        Ok(())
    }

    /// Path of the file backing `key`.
    ///
    /// Keys keep only ASCII letters, digits, `-` and `_`. A key with none of
    /// those maps to a salted hash so distinct keys still get distinct files.
    pub fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
            .collect();

        let stem = if safe.is_empty() {
            let mut hasher = Sha256::new();
            hasher.update(key.as_bytes());
            hasher.update(process_salt().as_bytes());
            let digest = format!("{:x}", hasher.finalize());
            format!("cache_{}", &digest[..16])
        } else {
            safe
        };

        self.dir.join(format!("{}.{}", stem, ENTRY_EXTENSION))
    }

    /// Store a value under `key`, replacing any previous entry.
    ///
    /// Fails with `Json` if the value has no JSON form and with `Cache` if
    /// the entry cannot be written.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let data = serde_json::to_value(value)?;
        let encoded = serde_json::to_vec(&CacheEnvelope::new(data))?;

        self.ensure_dir()?;
        let path = self.path_for(key);
        let write_error =
            |e: io::Error| PkgNewsError::Cache(format!("cannot write {}: {}", path.display(), e));

        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(write_error)?;
        tmp.write_all(&encoded).map_err(write_error)?;
        tmp.as_file().sync_all().map_err(write_error)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o600))
                .map_err(write_error)?;
        }

        tmp.persist(&path).map_err(|e| write_error(e.error))?;
        debug!("Cached {} bytes for key: {}", encoded.len(), key);
        Ok(())
    }

    /// Fetch the value stored under `key`.
    ///
    /// Returns `None` on a miss. Expired, corrupt and tampered entries are
    /// deleted and also reported as a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.path_for(key);

        let raw = match fs::read(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Cache miss for key: {}", key);
                return None;
            }
            Err(e) => {
                warn!("Error reading cache file {}: {}", path.display(), e);
                return None;
            }
        };

        let envelope = match self.inspect(&raw) {
            EntryState::Fresh(envelope) => envelope,
            EntryState::Expired => {
                debug!("Cache expired for key: {}", key);
                discard(&path);
                return None;
            }
            EntryState::Corrupt(reason) => {
                warn!("Corrupted cache file {}: {}", path.display(), reason);
                discard(&path);
                return None;
            }
            EntryState::Tampered => {
                warn!(
                    target: SECURITY_TARGET,
                    event = "cache_integrity_failure",
                    key = key,
                    path = %path.display(),
                    "Cache integrity check failed"
                );
                discard(&path);
                return None;
            }
        };

        match serde_json::from_value(envelope.data) {
            Ok(value) => {
                debug!("Cache hit for key: {}", key);
                Some(value)
            }
            Err(e) => {
                warn!("Cached payload for {} has unexpected shape: {}", key, e);
                discard(&path);
                None
            }
        }
    }

    /// Whether `key` has a fresh, intact entry. Never deletes anything.
    pub fn is_valid(&self, key: &str) -> bool {
        fs::read(self.path_for(key))
            .map(|raw| matches!(self.inspect(&raw), EntryState::Fresh(_)))
            .unwrap_or(false)
    }

    /// Delete every entry. Returns how many files were removed.
    pub fn clear(&self) -> Result<usize> {
        let mut cleared = 0;
        for path in self.entry_paths()? {
            match fs::remove_file(&path) {
                Ok(()) => cleared += 1,
                Err(e) => warn!("Failed to remove cache file {}: {}", path.display(), e),
            }
        }
        info!("Cleared {} cache files", cleared);
        Ok(cleared)
    }

    /// Delete expired, corrupt and tampered entries. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let paths = match self.entry_paths() {
            Ok(paths) => paths,
            Err(e) => {
                warn!("Failed to clean up cache: {}", e);
                return 0;
            }
        };

        let mut cleaned = 0;
        for path in paths {
            let stale = match fs::read(&path) {
                Ok(raw) => !matches!(self.inspect(&raw), EntryState::Fresh(_)),
                Err(_) => true,
            };
            if stale && fs::remove_file(&path).is_ok() {
                cleaned += 1;
            }
        }

        info!("Cleaned up {} expired cache files", cleaned);
        cleaned
    }

    /// Total size of all entries in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.entry_paths()
            .unwrap_or_default()
            .iter()
            .filter_map(|path| fs::metadata(path).ok())
            .map(|meta| meta.len())
            .sum()
    }

    pub fn stats(&self) -> CacheStats {
        let paths = self.entry_paths().unwrap_or_default();
        let mut stats = CacheStats {
            directory: self.dir.clone(),
            ttl: self.ttl,
            file_count: paths.len(),
            total_size: 0,
            expired_count: 0,
        };

        for path in &paths {
            if let Ok(meta) = fs::metadata(path) {
                stats.total_size += meta.len();
            }
            let expired = match fs::read(path) {
                Ok(raw) => !matches!(self.inspect(&raw), EntryState::Fresh(_)),
                Err(_) => true,
            };
            if expired {
                stats.expired_count += 1;
            }
        }

        stats
    }

    fn inspect(&self, raw: &[u8]) -> EntryState {
        let envelope: CacheEnvelope = match serde_json::from_slice(raw) {
            Ok(envelope) => envelope,
            Err(e) => return EntryState::Corrupt(e.to_string()),
        };

        if envelope.cache_version != CACHE_VERSION {
            return EntryState::Corrupt(format!(
                "unsupported cache version {}",
                envelope.cache_version
            ));
        }
        if !self.is_fresh(envelope.timestamp) {
            return EntryState::Expired;
        }
        if !envelope.is_intact() {
            return EntryState::Tampered;
        }
        EntryState::Fresh(envelope)
    }

    fn is_fresh(&self, written: DateTime<Utc>) -> bool {
        let age = Utc::now().signed_duration_since(written);
        match chrono::Duration::from_std(self.ttl) {
            Ok(ttl) => age < ttl,
            Err(_) => true,
        }
    }

    fn entry_paths(&self) -> Result<Vec<PathBuf>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(PkgNewsError::Cache(format!(
                    "cannot list cache directory {}: {}",
                    self.dir.display(),
                    e
                )))
            }
        };

        Ok(entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path.extension().and_then(|ext| ext.to_str()) == Some(ENTRY_EXTENSION)
            })
            .collect())
    }
}

fn discard(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!("Failed to remove cache file {}: {}", path.display(), e);
        }
    }
}
