//! Temporal pattern matching over event batches
//!
//! Two pattern shapes:
//! - Sequence: stages satisfied by events in timestamp order, each stage
//!   matching on the event's `metadata["type"]` tag
//! - Conjunction: a set of event types that must all occur within the time
//!   bound, order irrelevant
//!
//! The engine does not consume events: one event may contribute to several
//! concurrent partial sequence matches. Registered patterns are the only
//! engine state; each `process_events` call is independent.

use crate::event::SharedEvent;
use chrono::{DateTime, Duration, Utc};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};
use windrose_core::{canonical_group_key, EngineError, Value};

/// Pattern shape.
#[derive(Debug, Clone)]
pub enum PatternKind {
    /// Ordered event-type stages.
    Sequence(Vec<String>),
    /// Unordered set of event types that must all occur.
    Conjunction(Vec<String>),
}

/// A registered temporal pattern, bounded by `within`.
#[derive(Debug, Clone)]
pub struct Pattern {
    pub id: String,
    pub kind: PatternKind,
    pub within: Duration,
}

impl Pattern {
    pub fn sequence(
        id: impl Into<String>,
        stages: impl IntoIterator<Item = impl Into<String>>,
        within: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            kind: PatternKind::Sequence(stages.into_iter().map(Into::into).collect()),
            within,
        }
    }

    pub fn conjunction(
        id: impl Into<String>,
        types: impl IntoIterator<Item = impl Into<String>>,
        within: Duration,
    ) -> Self {
        Self {
            id: id.into(),
            kind: PatternKind::Conjunction(types.into_iter().map(Into::into).collect()),
            within,
        }
    }

    fn stages(&self) -> &[String] {
        match &self.kind {
            PatternKind::Sequence(s) | PatternKind::Conjunction(s) => s,
        }
    }
}

/// A completed pattern match.
#[derive(Debug, Clone)]
pub struct PatternMatch {
    pub pattern_id: String,
    pub events: Vec<SharedEvent>,
    pub matched_at: DateTime<Utc>,
}

/// An in-flight sequence match.
struct PartialMatch {
    stage: usize,
    first_ts: DateTime<Utc>,
    events: Vec<SharedEvent>,
}

/// Complex event processing engine: registered patterns matched against
/// time-ordered event batches.
#[derive(Debug, Default)]
pub struct CepEngine {
    patterns: IndexMap<String, Pattern>,
}

impl CepEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a pattern by id; re-registering an id replaces the pattern.
    pub fn register_pattern(&mut self, pattern: Pattern) -> Result<(), EngineError> {
        if pattern.id.is_empty() {
            return Err(EngineError::Configuration("pattern id must not be empty".into()));
        }
        if pattern.stages().is_empty() {
            return Err(EngineError::Configuration(format!(
                "pattern `{}` has no stages",
                pattern.id
            )));
        }
        if pattern.within.num_milliseconds() <= 0 {
            return Err(EngineError::Configuration(format!(
                "pattern `{}` `within` must be positive",
                pattern.id
            )));
        }
        trace!("registered pattern '{}'", pattern.id);
        self.patterns.insert(pattern.id.clone(), pattern);
        Ok(())
    }

    pub fn pattern_ids(&self) -> impl Iterator<Item = &str> {
        self.patterns.keys().map(String::as_str)
    }

    /// Matches every registered pattern against the batch.
    ///
    /// The batch is sorted by timestamp internally; input order carries no
    /// meaning. Events without a `metadata["type"]` tag never match a stage.
    pub fn process_events(&self, events: &[SharedEvent]) -> Vec<PatternMatch> {
        let mut sorted: Vec<SharedEvent> = events.iter().map(Arc::clone).collect();
        sorted.sort_by_key(|e| e.timestamp);

        let mut matches = Vec::new();
        for pattern in self.patterns.values() {
            match &pattern.kind {
                PatternKind::Sequence(stages) => {
                    match_sequence(pattern, stages, &sorted, &mut matches)
                }
                PatternKind::Conjunction(required) => {
                    match_conjunction(pattern, required, &sorted, &mut matches)
                }
            }
        }
        matches
    }

    /// Groups events sharing identical values for every field in `fields`.
    ///
    /// Field values are read from `data` first, `metadata` second; events
    /// missing any field are skipped. The composite key is the canonical
    /// JSON-encoded tuple of the field values, in caller order.
    pub fn correlate_events(
        &self,
        events: &[SharedEvent],
        fields: &[String],
    ) -> IndexMap<String, Vec<SharedEvent>> {
        let mut groups: IndexMap<String, Vec<SharedEvent>> = IndexMap::new();
        if fields.is_empty() {
            return groups;
        }

        'events: for event in events {
            let mut tuple: Vec<Value> = Vec::with_capacity(fields.len());
            for field in fields {
                match event.get(field).or_else(|| event.meta(field)) {
                    Some(v) => tuple.push(v.clone()),
                    None => continue 'events,
                }
            }
            groups
                .entry(canonical_group_key(&tuple))
                .or_default()
                .push(Arc::clone(event));
        }
        groups
    }
}

fn match_sequence(
    pattern: &Pattern,
    stages: &[String],
    sorted: &[SharedEvent],
    matches: &mut Vec<PatternMatch>,
) {
    let mut partials: Vec<PartialMatch> = Vec::new();

    for event in sorted {
        let Some(event_type) = event.event_type() else {
            continue;
        };

        // Advance live partials first; the same event may then also open a
        // new partial below (events are never consumed).
        let mut kept = Vec::with_capacity(partials.len());
        for mut partial in std::mem::take(&mut partials) {
            if event.timestamp - partial.first_ts > pattern.within {
                trace!("pattern '{}': partial timed out", pattern.id);
                continue;
            }
            if stages[partial.stage] == event_type {
                partial.events.push(Arc::clone(event));
                partial.stage += 1;
                if partial.stage == stages.len() {
                    debug!("pattern '{}' matched at {}", pattern.id, event.timestamp);
                    matches.push(PatternMatch {
                        pattern_id: pattern.id.clone(),
                        events: partial.events,
                        matched_at: event.timestamp,
                    });
                    continue;
                }
            }
            kept.push(partial);
        }
        partials = kept;

        if stages[0] == event_type {
            if stages.len() == 1 {
                matches.push(PatternMatch {
                    pattern_id: pattern.id.clone(),
                    events: vec![Arc::clone(event)],
                    matched_at: event.timestamp,
                });
            } else {
                partials.push(PartialMatch {
                    stage: 1,
                    first_ts: event.timestamp,
                    events: vec![Arc::clone(event)],
                });
            }
        }
    }
}

fn match_conjunction(
    pattern: &Pattern,
    required: &[String],
    sorted: &[SharedEvent],
    matches: &mut Vec<PatternMatch>,
) {
    // Only events carrying one of the required types participate.
    let candidates: Vec<&SharedEvent> = sorted
        .iter()
        .filter(|e| {
            e.event_type()
                .map(|t| required.iter().any(|r| r == t))
                .unwrap_or(false)
        })
        .collect();

    let mut counts: HashMap<&str, usize> = HashMap::new();
    let mut lo = 0;
    for hi in 0..candidates.len() {
        // event_type() is Some for every candidate by construction
        let Some(t) = candidates[hi].event_type() else {
            continue;
        };
        *counts.entry(t).or_insert(0) += 1;

        while candidates[hi].timestamp - candidates[lo].timestamp > pattern.within {
            if let Some(t_lo) = candidates[lo].event_type() {
                if let Some(c) = counts.get_mut(t_lo) {
                    *c = c.saturating_sub(1);
                }
            }
            lo += 1;
        }

        let complete = required
            .iter()
            .all(|r| counts.get(r.as_str()).copied().unwrap_or(0) > 0);
        if complete {
            // Latest occurrence of each required type inside the window.
            let mut latest: IndexMap<&str, &SharedEvent> = IndexMap::new();
            for &candidate in &candidates[lo..=hi] {
                if let Some(t) = candidate.event_type() {
                    latest.insert(t, candidate);
                }
            }
            let mut events: Vec<SharedEvent> = required
                .iter()
                .filter_map(|r| latest.get(r.as_str()).map(|e| Arc::clone(*e)))
                .collect();
            events.sort_by_key(|e| e.timestamp);

            debug!(
                "pattern '{}' conjunction complete at {}",
                pattern.id, candidates[hi].timestamp
            );
            matches.push(PatternMatch {
                pattern_id: pattern.id.clone(),
                events,
                matched_at: candidates[hi].timestamp,
            });

            // Non-overlapping matches: consume this occurrence set.
            counts.clear();
            lo = hi + 1;
        }
    }
}
