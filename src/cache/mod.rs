//! File-backed key/value cache with expiry and tamper detection.
//!
//! Every entry is one JSON file holding a [`CacheEnvelope`]: the payload, the
//! time it was written and a SHA-256 digest of the payload's canonical JSON.
//! Reads that find an expired, corrupt or tampered entry delete it and report
//! a miss.

pub mod envelope;
pub mod store;

pub use envelope::{canonical_json, integrity_hash, tagged_datetime, CacheEnvelope, CACHE_VERSION};
pub use store::{CacheStats, CacheStore};
