//! On-disk cache entry format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Format version written into every entry.
pub const CACHE_VERSION: &str = "1.0";

/// A single cache entry as stored on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEnvelope {
    /// When the entry was written.
    #[serde(with = "tagged_datetime")]
    pub timestamp: DateTime<Utc>,
    /// The cached payload.
    pub data: Value,
    /// Hex SHA-256 of `canonical_json(data)`.
    pub integrity_hash: String,
    /// Entry format version.
    pub cache_version: String,
}

impl CacheEnvelope {
    /// Wrap a payload stamped with the current time.
    pub fn new(data: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            integrity_hash: integrity_hash(&data),
            data,
            cache_version: CACHE_VERSION.to_string(),
        }
    }

    /// Whether the stored digest still matches the payload.
    pub fn is_intact(&self) -> bool {
        integrity_hash(&self.data) == self.integrity_hash
    }
}

/// Serialize a JSON value compactly with object keys in sorted order.
pub fn canonical_json(value: &Value) -> String {
    sort_keys(value).to_string()
}

fn sort_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.clone(), sort_keys(v)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys).collect()),
        other => other.clone(),
    }
}

/// Hex SHA-256 digest of the canonical JSON form.
pub fn integrity_hash(value: &Value) -> String {
    format!("{:x}", Sha256::digest(canonical_json(value).as_bytes()))
}

/// Serde adapter carrying a timestamp as `{"__datetime__": "<rfc3339>"}`.
///
/// Use with `#[serde(with = "pkgnews::cache::tagged_datetime")]`.
pub mod tagged_datetime {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct Tagged {
        #[serde(rename = "__datetime__")]
        value: String,
    }

    pub fn serialize<S: Serializer>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        Tagged {
            value: dt.to_rfc3339(),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let tagged = Tagged::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&tagged.value)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Stamped {
        #[serde(with = "tagged_datetime")]
        at: DateTime<Utc>,
    }

    #[test]
    fn test_canonical_json_sorts_nested_keys() {
        let value = json!({"b": 1, "a": {"z": true, "y": [ {"d": 1, "c": 2} ]}});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"y":[{"c":2,"d":1}],"z":true},"b":1}"#
        );
    }

    #[test]
    fn test_integrity_hash_ignores_key_order() {
        let a = json!({"title": "x", "priority": 1});
        let b = json!({"priority": 1, "title": "x"});
        assert_eq!(integrity_hash(&a), integrity_hash(&b));
        assert_eq!(integrity_hash(&a).len(), 64);
    }

    #[test]
    fn test_integrity_hash_detects_change() {
        let a = json!({"title": "x"});
        let b = json!({"title": "y"});
        assert_ne!(integrity_hash(&a), integrity_hash(&b));
    }

    #[test]
    fn test_tagged_datetime_form() {
        let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap();
        let value = serde_json::to_value(Stamped { at }).unwrap();
        assert_eq!(value, json!({"at": {"__datetime__": "2024-06-01T12:30:00+00:00"}}));
    }

    #[test]
    fn test_tagged_datetime_roundtrip_keeps_subseconds() {
        let at = Utc::now();
        let encoded = serde_json::to_string(&Stamped { at }).unwrap();
        let decoded: Stamped = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.at, at);
    }

    #[test]
    fn test_tagged_datetime_rejects_garbage() {
        let result: Result<Stamped, _> =
            serde_json::from_str(r#"{"at": {"__datetime__": "yesterday"}}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_envelope_intact_until_modified() {
        let mut envelope = CacheEnvelope::new(json!([{"title": "a"}]));
        assert!(envelope.is_intact());
        assert_eq!(envelope.cache_version, CACHE_VERSION);

        envelope.data = json!([{"title": "b"}]);
        assert!(!envelope.is_intact());
    }
}
