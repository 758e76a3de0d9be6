//! Windowed stream joins and static-table enrichment
//!
//! Pairs events from two sequences by key within a shared time window.
//! Both sides are windowed with the same [`WindowSpec`]; within each window
//! the sides are indexed by the string representation of their key field
//! (one representative per key, last event wins) and probed. A matched
//! representative is consumed, so every pairing is one-shot and inner-join
//! cardinality stays within `min(|left|, |right|)`.
//!
//! Key equality is on the string representation so numeric/string type
//! mismatches between sides still join (`5` pairs with `"5"`).

use crate::event::{FxIndexMap, SharedEvent, StreamEvent};
use crate::window::{assign_windows, WindowSpec};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::trace;
use windrose_core::{EngineError, Value};

/// Join semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JoinType {
    Inner,
    Left,
    Right,
    Full,
}

impl FromStr for JoinType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, EngineError> {
        match s {
            "inner" => Ok(JoinType::Inner),
            "left" => Ok(JoinType::Left),
            "right" => Ok(JoinType::Right),
            "full" => Ok(JoinType::Full),
            other => Err(EngineError::Configuration(format!(
                "unknown join type `{}`",
                other
            ))),
        }
    }
}

/// Configuration for a stream join.
#[derive(Debug, Clone)]
pub struct StreamJoinConfig {
    pub join_type: JoinType,
    /// Key field read from left events' `data`.
    pub left_key: String,
    /// Key field read from right events' `data`.
    pub right_key: String,
    /// Shared windowing applied to both sides.
    pub window: WindowSpec,
}

/// One joined output row. Exactly one side may be absent, depending on the
/// join type.
#[derive(Debug, Clone)]
pub struct JoinedRecord {
    pub join_key: String,
    pub left: Option<SharedEvent>,
    pub right: Option<SharedEvent>,
}

/// String representation used for join-key equality. `Str` values use their
/// raw contents (no JSON quoting) so `5` and `"5"` compare equal.
fn key_repr(value: &Value) -> String {
    match value {
        Value::Str(s) => s.clone(),
        other => other.to_string(),
    }
}

fn event_key(event: &StreamEvent, field: &str) -> Option<String> {
    event.get(field).map(key_repr)
}

/// Joins two event sequences per the configured window and semantics.
///
/// An event missing its key field is a non-match: skipped for `inner`,
/// emitted partner-less (with an empty join key) under outer semantics.
pub fn join_streams(
    left: &[SharedEvent],
    right: &[SharedEvent],
    config: &StreamJoinConfig,
) -> Result<Vec<JoinedRecord>, EngineError> {
    let left_windows = assign_windows(left, &config.window)?;
    let right_windows = assign_windows(right, &config.window)?;

    // Union of window keys: left order first, then right-only windows.
    let mut keys: Vec<&String> = left_windows.keys().collect();
    keys.extend(right_windows.keys().filter(|k| !left_windows.contains_key(*k)));

    let mut records = Vec::new();
    for key in keys {
        let lefts = left_windows
            .get(key)
            .map(|w| w.events.as_slice())
            .unwrap_or_default();
        let rights = right_windows
            .get(key)
            .map(|w| w.events.as_slice())
            .unwrap_or_default();
        trace!(
            "joining window {}: {} left, {} right",
            key,
            lefts.len(),
            rights.len()
        );
        join_window(lefts, rights, config, &mut records);
    }
    Ok(records)
}

fn join_window(
    lefts: &[SharedEvent],
    rights: &[SharedEvent],
    config: &StreamJoinConfig,
    out: &mut Vec<JoinedRecord>,
) {
    // One representative per key; a later event replaces an earlier one.
    let mut right_index: IndexMap<String, &SharedEvent> = IndexMap::new();
    for event in rights {
        if let Some(k) = event_key(event, &config.right_key) {
            right_index.insert(k, event);
        }
    }

    let mut matched_keys: IndexSet<String> = IndexSet::new();

    // Left pass: every join type except `right` probes from the left.
    if config.join_type != JoinType::Right {
        for event in lefts {
            let Some(k) = event_key(event, &config.left_key) else {
                if config.join_type != JoinType::Inner {
                    out.push(JoinedRecord {
                        join_key: String::new(),
                        left: Some(Arc::clone(event)),
                        right: None,
                    });
                }
                continue;
            };

            // A representative pairs once: consuming it keeps inner-join
            // cardinality within min(|left|, |right|).
            match right_index.swap_remove(&k) {
                Some(partner) => {
                    matched_keys.insert(k.clone());
                    out.push(JoinedRecord {
                        join_key: k,
                        left: Some(Arc::clone(event)),
                        right: Some(Arc::clone(partner)),
                    });
                }
                None if config.join_type != JoinType::Inner => {
                    out.push(JoinedRecord {
                        join_key: k,
                        left: Some(Arc::clone(event)),
                        right: None,
                    });
                }
                None => {}
            }
        }
    }

    match config.join_type {
        JoinType::Right => {
            // Symmetric probe: every right event exactly once.
            let mut left_index: IndexMap<String, &SharedEvent> = IndexMap::new();
            for event in lefts {
                if let Some(k) = event_key(event, &config.left_key) {
                    left_index.insert(k, event);
                }
            }
            for event in rights {
                let Some(k) = event_key(event, &config.right_key) else {
                    out.push(JoinedRecord {
                        join_key: String::new(),
                        left: None,
                        right: Some(Arc::clone(event)),
                    });
                    continue;
                };
                out.push(JoinedRecord {
                    join_key: k.clone(),
                    left: left_index.swap_remove(&k).map(|e| Arc::clone(e)),
                    right: Some(Arc::clone(event)),
                });
            }
        }
        JoinType::Full => {
            // Right events whose key never matched a left event.
            for event in rights {
                match event_key(event, &config.right_key) {
                    Some(k) if matched_keys.contains(&k) => {}
                    Some(k) => out.push(JoinedRecord {
                        join_key: k,
                        left: None,
                        right: Some(Arc::clone(event)),
                    }),
                    None => out.push(JoinedRecord {
                        join_key: String::new(),
                        left: None,
                        right: Some(Arc::clone(event)),
                    }),
                }
            }
        }
        _ => {}
    }
}

/// Enriches a stream against a static lookup table: left semantics, no
/// windowing (the table is immediately available in full).
///
/// A matched row materializes as a synthetic right-side event carrying the
/// row's fields, the probing event's timestamp, and the join key as event
/// key.
pub fn enrich_stream(
    events: &[SharedEvent],
    table: &[FxIndexMap<String, Value>],
    source_field: &str,
    table_key_field: &str,
) -> Vec<JoinedRecord> {
    let mut index: IndexMap<String, &FxIndexMap<String, Value>> = IndexMap::new();
    for row in table {
        if let Some(k) = row.get(table_key_field).map(key_repr) {
            index.insert(k, row);
        }
    }

    events
        .iter()
        .map(|event| {
            let Some(k) = event_key(event, source_field) else {
                return JoinedRecord {
                    join_key: String::new(),
                    left: Some(Arc::clone(event)),
                    right: None,
                };
            };
            let right = index.get(&k).map(|row| {
                let mut enrichment = StreamEvent::new(k.clone()).with_timestamp(event.timestamp);
                enrichment.data = (*row).clone();
                Arc::new(enrichment)
            });
            JoinedRecord {
                join_key: k,
                left: Some(Arc::clone(event)),
                right,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap as StdIndexMap;
    use rustc_hash::FxBuildHasher;

    fn order(ms: i64, user: impl Into<Value>, amount: f64) -> SharedEvent {
        Arc::new(
            StreamEvent::new("orders")
                .at_millis(ms)
                .with_field("user", user)
                .with_field("amount", amount),
        )
    }

    fn payment(ms: i64, user: impl Into<Value>) -> SharedEvent {
        Arc::new(
            StreamEvent::new("payments")
                .at_millis(ms)
                .with_field("user", user),
        )
    }

    fn config(join_type: JoinType) -> StreamJoinConfig {
        StreamJoinConfig {
            join_type,
            left_key: "user".into(),
            right_key: "user".into(),
            window: WindowSpec::tumbling_millis(10_000),
        }
    }

    // ==========================================================================
    // Join Semantics
    // ==========================================================================

    #[test]
    fn test_inner_join_matched_pairs_only() {
        let left = vec![order(0, "alice", 10.0), order(1, "bob", 20.0)];
        let right = vec![payment(2, "alice")];
        let records = join_streams(&left, &right, &config(JoinType::Inner)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].join_key, "alice");
        assert!(records[0].left.is_some() && records[0].right.is_some());
    }

    #[test]
    fn test_left_join_length_equals_left_input() {
        let left = vec![
            order(0, "alice", 10.0),
            order(1, "bob", 20.0),
            order(2, "carol", 30.0),
        ];
        let right = vec![payment(3, "bob")];
        let records = join_streams(&left, &right, &config(JoinType::Left)).unwrap();
        assert_eq!(records.len(), left.len());
        let unmatched = records.iter().filter(|r| r.right.is_none()).count();
        assert_eq!(unmatched, 2);
    }

    #[test]
    fn test_right_join_length_equals_right_input() {
        let left = vec![order(0, "alice", 10.0)];
        let right = vec![payment(1, "alice"), payment(2, "dave")];
        let records = join_streams(&left, &right, &config(JoinType::Right)).unwrap();
        assert_eq!(records.len(), right.len());
        assert!(records.iter().any(|r| r.left.is_none()));
    }

    #[test]
    fn test_full_join_union() {
        let left = vec![order(0, "alice", 10.0), order(1, "bob", 20.0)];
        let right = vec![payment(2, "bob"), payment(3, "dave")];
        let records = join_streams(&left, &right, &config(JoinType::Full)).unwrap();
        // alice (left only), bob (pair), dave (right only)
        assert_eq!(records.len(), 3);
        assert_eq!(
            records.iter().filter(|r| r.left.is_some() && r.right.is_some()).count(),
            1
        );
    }

    #[test]
    fn test_inner_join_bounded_by_min_side() {
        let left = vec![order(0, "alice", 1.0), order(1, "alice", 2.0)];
        let right = vec![payment(2, "alice"), payment(3, "alice"), payment(4, "alice")];
        let records = join_streams(&left, &right, &config(JoinType::Inner)).unwrap();
        assert!(records.len() <= left.len().min(right.len()));
    }

    // ==========================================================================
    // Windowing Interaction
    // ==========================================================================

    #[test]
    fn test_events_in_different_windows_never_join() {
        let left = vec![order(0, "alice", 10.0)];
        let right = vec![payment(50_000, "alice")];
        let records = join_streams(&left, &right, &config(JoinType::Inner)).unwrap();
        assert!(records.is_empty());
    }

    #[test]
    fn test_right_only_window_surfaces_in_full_join() {
        let left = vec![order(0, "alice", 10.0)];
        let right = vec![payment(50_000, "dave")];
        let records = join_streams(&left, &right, &config(JoinType::Full)).unwrap();
        assert_eq!(records.len(), 2);
    }

    // ==========================================================================
    // Key Semantics
    // ==========================================================================

    #[test]
    fn test_string_representation_bridges_types() {
        let left = vec![order(0, 5i64, 10.0)];
        let right = vec![payment(1, "5")];
        let records = join_streams(&left, &right, &config(JoinType::Inner)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].join_key, "5");
    }

    #[test]
    fn test_missing_key_field_is_non_match() {
        let left = vec![Arc::new(
            StreamEvent::new("orders").at_millis(0).with_field("amount", 1.0),
        )];
        let right = vec![payment(1, "alice")];

        let inner = join_streams(&left, &right, &config(JoinType::Inner)).unwrap();
        assert!(inner.is_empty());

        let outer = join_streams(&left, &right, &config(JoinType::Left)).unwrap();
        assert_eq!(outer.len(), 1);
        assert!(outer[0].right.is_none());
        assert_eq!(outer[0].join_key, "");
    }

    #[test]
    fn test_last_right_event_per_key_wins() {
        let left = vec![order(5, "alice", 1.0)];
        let right = vec![
            Arc::new(
                StreamEvent::new("p")
                    .at_millis(0)
                    .with_field("user", "alice")
                    .with_field("seq", 1i64),
            ),
            Arc::new(
                StreamEvent::new("p")
                    .at_millis(1)
                    .with_field("user", "alice")
                    .with_field("seq", 2i64),
            ),
        ];
        let records = join_streams(&left, &right, &config(JoinType::Inner)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].right.as_ref().unwrap().get_int("seq"), Some(2));
    }

    // ==========================================================================
    // Enrichment
    // ==========================================================================

    fn table_row(pairs: &[(&str, Value)]) -> FxIndexMap<String, Value> {
        let mut row = StdIndexMap::with_hasher(FxBuildHasher);
        for (k, v) in pairs {
            row.insert(k.to_string(), v.clone());
        }
        row
    }

    #[test]
    fn test_enrich_left_semantics() {
        let events = vec![order(0, "alice", 10.0), order(1, "mallory", 20.0)];
        let table = vec![table_row(&[
            ("user_id", "alice".into()),
            ("tier", "gold".into()),
        ])];

        let records = enrich_stream(&events, &table, "user", "user_id");
        assert_eq!(records.len(), events.len());

        let alice = &records[0];
        assert_eq!(
            alice.right.as_ref().unwrap().get_str("tier"),
            Some("gold")
        );
        assert_eq!(alice.right.as_ref().unwrap().millis(), 0);

        assert!(records[1].right.is_none());
    }

    #[test]
    fn test_enrich_missing_source_field() {
        let events = vec![Arc::new(StreamEvent::new("k").at_millis(0))];
        let table = vec![table_row(&[("user_id", "alice".into())])];
        let records = enrich_stream(&events, &table, "user", "user_id");
        assert_eq!(records.len(), 1);
        assert!(records[0].right.is_none());
    }
}
