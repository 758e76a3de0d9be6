//! Window assignment for stream processing
//!
//! Partitions a batch of events into time-bounded groups:
//! - Tumbling windows (fixed size, non-overlapping)
//! - Sliding windows (fixed size, overlapping by a slide step)
//! - Session windows (split on inactivity gaps)
//! - Custom windows (caller-supplied partitioner)
//!
//! Windowing is batch-oriented: a full event sequence in, a complete window
//! map out. Windows are created lazily as events are assigned and are
//! immutable once the pass returns.

use crate::event::SharedEvent;
use chrono::{DateTime, Duration, TimeZone, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use windrose_core::EngineError;

/// Strategy for caller-defined windowing: maps the full event list to a list
/// of event groups. Each non-empty group becomes one window whose bounds
/// derive from the group's min/max timestamps.
pub trait WindowPartitioner: Send + Sync {
    fn partition(&self, events: &[SharedEvent]) -> Vec<Vec<SharedEvent>>;
}

impl<F> WindowPartitioner for F
where
    F: Fn(&[SharedEvent]) -> Vec<Vec<SharedEvent>> + Send + Sync,
{
    fn partition(&self, events: &[SharedEvent]) -> Vec<Vec<SharedEvent>> {
        self(events)
    }
}

/// Window assignment strategy.
#[derive(Clone)]
pub enum WindowSpec {
    /// Fixed-size windows anchored at `floor(t / size) * size`.
    Tumbling { size: Duration },
    /// Fixed-size windows advancing by `slide`; an event belongs to every
    /// window whose `[start, start + size)` contains its timestamp.
    Sliding { size: Duration, slide: Duration },
    /// Events grouped while the gap between consecutive (sorted) events
    /// stays below `gap`.
    Session { gap: Duration },
    /// Caller-supplied partitioner.
    Custom(Arc<dyn WindowPartitioner>),
}

impl fmt::Debug for WindowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowSpec::Tumbling { size } => f.debug_struct("Tumbling").field("size", size).finish(),
            WindowSpec::Sliding { size, slide } => f
                .debug_struct("Sliding")
                .field("size", size)
                .field("slide", slide)
                .finish(),
            WindowSpec::Session { gap } => f.debug_struct("Session").field("gap", gap).finish(),
            WindowSpec::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

impl WindowSpec {
    pub fn tumbling_millis(size_ms: i64) -> Self {
        WindowSpec::Tumbling {
            size: Duration::milliseconds(size_ms),
        }
    }

    pub fn sliding_millis(size_ms: i64, slide_ms: i64) -> Self {
        WindowSpec::Sliding {
            size: Duration::milliseconds(size_ms),
            slide: Duration::milliseconds(slide_ms),
        }
    }

    pub fn session_millis(gap_ms: i64) -> Self {
        WindowSpec::Session {
            gap: Duration::milliseconds(gap_ms),
        }
    }

    fn validate(&self) -> Result<(), EngineError> {
        match self {
            WindowSpec::Tumbling { size } if size.num_milliseconds() <= 0 => Err(
                EngineError::Configuration("tumbling window size must be positive".into()),
            ),
            WindowSpec::Sliding { size, slide }
                if size.num_milliseconds() <= 0 || slide.num_milliseconds() <= 0 =>
            {
                Err(EngineError::Configuration(
                    "sliding window size and slide must be positive".into(),
                ))
            }
            WindowSpec::Session { gap } if gap.num_milliseconds() <= 0 => Err(
                EngineError::Configuration("session gap must be positive".into()),
            ),
            _ => Ok(()),
        }
    }
}

/// Connector-facing window configuration with a string `kind`.
///
/// The typed [`WindowSpec`] is the engine API; this raw form exists for
/// configuration delivered as data, where an unrecognized kind must fail
/// fast instead of silently selecting a default algorithm.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawWindowConfig {
    pub kind: String,
    #[serde(default)]
    pub size_ms: Option<i64>,
    #[serde(default)]
    pub slide_ms: Option<i64>,
    #[serde(default)]
    pub gap_ms: Option<i64>,
}

impl TryFrom<&RawWindowConfig> for WindowSpec {
    type Error = EngineError;

    fn try_from(raw: &RawWindowConfig) -> Result<Self, EngineError> {
        let require = |field: Option<i64>, name: &str| {
            field.ok_or_else(|| {
                EngineError::Configuration(format!(
                    "window kind `{}` requires `{}`",
                    raw.kind, name
                ))
            })
        };

        let spec = match raw.kind.as_str() {
            "tumbling" => WindowSpec::tumbling_millis(require(raw.size_ms, "size_ms")?),
            "sliding" => WindowSpec::sliding_millis(
                require(raw.size_ms, "size_ms")?,
                require(raw.slide_ms, "slide_ms")?,
            ),
            "session" => WindowSpec::session_millis(require(raw.gap_ms, "gap_ms")?),
            other => {
                return Err(EngineError::Configuration(format!(
                    "unknown window type `{}`",
                    other
                )))
            }
        };
        spec.validate()?;
        Ok(spec)
    }
}

/// A time-bounded group of events. `end` is exclusive: every event satisfies
/// `start <= t < end`.
#[derive(Debug, Clone)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub events: Vec<SharedEvent>,
}

impl Window {
    pub fn start_millis(&self) -> i64 {
        self.start.timestamp_millis()
    }

    pub fn end_millis(&self) -> i64 {
        self.end.timestamp_millis()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn key(&self) -> String {
        format!("{}-{}", self.start_millis(), self.end_millis())
    }
}

fn ts_from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

/// Assigns a batch of events to windows.
///
/// Returns a map from window key (`"{start_ms}-{end_ms}"`, or
/// `"custom-{i}-{start_ms}"` for custom windows) to [`Window`], iterating in
/// ascending start order for tumbling/sliding, chronological order for
/// sessions, and emission order for custom windows. Empty input yields an
/// empty map.
pub fn assign_windows(
    events: &[SharedEvent],
    spec: &WindowSpec,
) -> Result<IndexMap<String, Window>, EngineError> {
    spec.validate()?;

    let mut windows = IndexMap::new();
    if events.is_empty() {
        return Ok(windows);
    }

    match spec {
        WindowSpec::Tumbling { size } => {
            let size_ms = size.num_milliseconds();
            let mut buckets: BTreeMap<i64, Vec<SharedEvent>> = BTreeMap::new();
            for event in events {
                let start = event.millis().div_euclid(size_ms) * size_ms;
                buckets.entry(start).or_default().push(Arc::clone(event));
            }
            for (start, bucket) in buckets {
                let window = Window {
                    start: ts_from_millis(start),
                    end: ts_from_millis(start + size_ms),
                    events: bucket,
                };
                windows.insert(window.key(), window);
            }
        }
        WindowSpec::Sliding { size, slide } => {
            let size_ms = size.num_milliseconds();
            let slide_ms = slide.num_milliseconds();
            let mut buckets: BTreeMap<i64, Vec<SharedEvent>> = BTreeMap::new();
            for event in events {
                let t = event.millis();
                // Window starts are anchored at multiples of the slide; the
                // event belongs to every start in (t - size, t].
                let k_min = (t - size_ms).div_euclid(slide_ms) + 1;
                let k_max = t.div_euclid(slide_ms);
                for k in k_min..=k_max {
                    buckets
                        .entry(k * slide_ms)
                        .or_default()
                        .push(Arc::clone(event));
                }
            }
            for (start, bucket) in buckets {
                let window = Window {
                    start: ts_from_millis(start),
                    end: ts_from_millis(start + size_ms),
                    events: bucket,
                };
                windows.insert(window.key(), window);
            }
        }
        WindowSpec::Session { gap } => {
            let mut sorted: Vec<SharedEvent> = events.iter().map(Arc::clone).collect();
            sorted.sort_by_key(|e| e.timestamp);

            let mut current: Vec<SharedEvent> = Vec::new();
            for event in sorted {
                if let Some(last) = current.last() {
                    if event.timestamp - last.timestamp >= *gap {
                        push_session(&mut windows, std::mem::take(&mut current));
                    }
                }
                current.push(event);
            }
            push_session(&mut windows, current);
        }
        WindowSpec::Custom(partitioner) => {
            for (i, group) in partitioner.partition(events).into_iter().enumerate() {
                if group.is_empty() {
                    continue;
                }
                let start = group.iter().map(|e| e.millis()).min().unwrap_or(0);
                let end = group.iter().map(|e| e.millis()).max().unwrap_or(0) + 1;
                let window = Window {
                    start: ts_from_millis(start),
                    end: ts_from_millis(end),
                    events: group,
                };
                windows.insert(format!("custom-{}-{}", i, start), window);
            }
        }
    }

    Ok(windows)
}

fn push_session(windows: &mut IndexMap<String, Window>, session: Vec<SharedEvent>) {
    if session.is_empty() {
        return;
    }
    // Sessions are built from sorted events, so bounds are first/last.
    let start = session[0].millis();
    let end = session[session.len() - 1].millis() + 1;
    let window = Window {
        start: ts_from_millis(start),
        end: ts_from_millis(end),
        events: session,
    };
    windows.insert(window.key(), window);
}
