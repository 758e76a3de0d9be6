//! Event types for the runtime

use chrono::{DateTime, TimeZone, Utc};
use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use windrose_core::{EngineError, Value};

/// Type alias for IndexMap with FxBuildHasher for faster hashing of event fields.
pub type FxIndexMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// A shared reference to a StreamEvent for cheap passing through pipelines.
/// Windows, joins, and pattern matchers all hold the same allocation.
pub type SharedEvent = Arc<StreamEvent>;

/// A timestamped key/value event.
///
/// Immutable once created: every engine stage reads events and produces new
/// ones, never mutates an ingested event in place. Ordering within a
/// sequence is by `timestamp`; arrival order carries no meaning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Event key (Arc<str> for O(1) clone instead of O(n) String clone)
    pub key: Arc<str>,
    /// Event time in UTC
    pub timestamp: DateTime<Utc>,
    /// Event payload
    pub data: FxIndexMap<String, Value>,
    /// Out-of-band tags: pattern type markers, correlation fields
    #[serde(default)]
    pub metadata: FxIndexMap<String, Value>,
}

impl StreamEvent {
    pub fn new(key: impl Into<Arc<str>>) -> Self {
        Self {
            key: key.into(),
            timestamp: Utc::now(),
            data: IndexMap::with_hasher(FxBuildHasher),
            metadata: IndexMap::with_hasher(FxBuildHasher),
        }
    }

    /// Sets the event time from milliseconds since the Unix epoch.
    pub fn at_millis(mut self, ms: i64) -> Self {
        self.timestamp = Utc.timestamp_millis_opt(ms).single().unwrap_or_default();
        self
    }

    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = ts;
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Event time in milliseconds since the Unix epoch.
    pub fn millis(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(|v| v.as_float())
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.data.get(key).and_then(|v| v.as_int())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    /// Pattern type tag, read from `metadata["type"]`.
    pub fn event_type(&self) -> Option<&str> {
        self.meta_str("type")
    }

    /// Builds an event from a raw JSON object at the ingestion boundary.
    ///
    /// Expected shape: `{"key": .., "timestamp": <ms>, "value": {..},
    /// "metadata": {..}}` with `metadata` optional. A missing or non-integer
    /// timestamp is rejected — defaulting to "now" belongs to the connector,
    /// not the engine.
    pub fn from_json(raw: &serde_json::Value) -> Result<Self, EngineError> {
        let obj = raw
            .as_object()
            .ok_or_else(|| EngineError::InvalidEvent("event must be a JSON object".into()))?;

        let key = obj
            .get("key")
            .and_then(|k| k.as_str())
            .ok_or_else(|| EngineError::InvalidEvent("missing string field `key`".into()))?;

        let ms = obj
            .get("timestamp")
            .and_then(|t| t.as_i64())
            .ok_or_else(|| {
                EngineError::InvalidEvent("missing integer field `timestamp`".into())
            })?;

        let timestamp = Utc
            .timestamp_millis_opt(ms)
            .single()
            .ok_or_else(|| EngineError::InvalidEvent(format!("timestamp {} out of range", ms)))?;

        let data = match obj.get("value") {
            Some(v) => parse_fields(v)?,
            None => IndexMap::with_hasher(FxBuildHasher),
        };
        let metadata = match obj.get("metadata") {
            Some(v) => parse_fields(v)?,
            None => IndexMap::with_hasher(FxBuildHasher),
        };

        Ok(Self {
            key: Arc::from(key),
            timestamp,
            data,
            metadata,
        })
    }
}

fn parse_fields(raw: &serde_json::Value) -> Result<FxIndexMap<String, Value>, EngineError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| EngineError::InvalidEvent("`value`/`metadata` must be objects".into()))?;
    let mut fields = IndexMap::with_capacity_and_hasher(obj.len(), FxBuildHasher);
    for (k, v) in obj {
        let value: Value = serde_json::from_value(v.clone())
            .map_err(|e| EngineError::InvalidEvent(format!("field `{}`: {}", k, e)))?;
        fields.insert(k.clone(), value);
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==========================================================================
    // Construction Tests
    // ==========================================================================

    #[test]
    fn test_event_new() {
        let event = StreamEvent::new("orders");
        assert_eq!(&*event.key, "orders");
        assert!(event.data.is_empty());
        assert!(event.metadata.is_empty());
    }

    #[test]
    fn test_event_at_millis() {
        let event = StreamEvent::new("orders").at_millis(1_700_000_000_000);
        assert_eq!(event.millis(), 1_700_000_000_000);
    }

    #[test]
    fn test_event_builder_fields() {
        let event = StreamEvent::new("orders")
            .with_field("amount", 42.5)
            .with_field("user", "alice")
            .with_meta("type", "purchase");

        assert_eq!(event.get_float("amount"), Some(42.5));
        assert_eq!(event.get_str("user"), Some("alice"));
        assert_eq!(event.event_type(), Some("purchase"));
    }

    #[test]
    fn test_event_overwrite_field() {
        let event = StreamEvent::new("k")
            .with_field("x", 1i64)
            .with_field("x", 2i64);
        assert_eq!(event.get_int("x"), Some(2));
        assert_eq!(event.data.len(), 1);
    }

    // ==========================================================================
    // Field Access Tests
    // ==========================================================================

    #[test]
    fn test_get_float_widens_int() {
        let event = StreamEvent::new("k").with_field("n", 5i64);
        assert_eq!(event.get_float("n"), Some(5.0));
    }

    #[test]
    fn test_get_missing_field() {
        let event = StreamEvent::new("k");
        assert_eq!(event.get("missing"), None);
        assert_eq!(event.get_float("missing"), None);
        assert_eq!(event.get_str("missing"), None);
    }

    // ==========================================================================
    // Ingestion Tests
    // ==========================================================================

    #[test]
    fn test_from_json_valid() {
        let raw = serde_json::json!({
            "key": "sensor",
            "timestamp": 1000,
            "value": {"temp": 21.5},
            "metadata": {"type": "reading"}
        });
        let event = StreamEvent::from_json(&raw).unwrap();
        assert_eq!(&*event.key, "sensor");
        assert_eq!(event.millis(), 1000);
        assert_eq!(event.get_float("temp"), Some(21.5));
        assert_eq!(event.event_type(), Some("reading"));
    }

    #[test]
    fn test_from_json_missing_timestamp_rejected() {
        let raw = serde_json::json!({"key": "sensor", "value": {}});
        let err = StreamEvent::from_json(&raw).unwrap_err();
        assert!(matches!(err, EngineError::InvalidEvent(_)));
        assert!(err.to_string().contains("timestamp"));
    }

    #[test]
    fn test_from_json_missing_key_rejected() {
        let raw = serde_json::json!({"timestamp": 1000});
        assert!(StreamEvent::from_json(&raw).is_err());
    }

    #[test]
    fn test_from_json_metadata_optional() {
        let raw = serde_json::json!({"key": "k", "timestamp": 0, "value": {"a": 1}});
        let event = StreamEvent::from_json(&raw).unwrap();
        assert!(event.metadata.is_empty());
        assert_eq!(event.get_int("a"), Some(1));
    }

    #[test]
    fn test_from_json_nested_value() {
        let raw = serde_json::json!({
            "key": "k",
            "timestamp": 0,
            "value": {"nested": {"deep": [1, 2]}}
        });
        let event = StreamEvent::from_json(&raw).unwrap();
        let nested = event.get("nested").unwrap();
        assert_eq!(
            nested.get("deep").and_then(|d| d.get_index(1)),
            Some(&Value::Int(2))
        );
    }
}
