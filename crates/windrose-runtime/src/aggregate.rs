//! Windowed aggregation
//!
//! Reduces each window's events into scalar statistics, optionally grouped
//! by field combinations. Per-window results are independent, so the pass
//! fans out across windows with rayon while preserving window order.
//!
//! Numeric ops read `event.data[field]`; non-numeric or missing values are
//! excluded from the computation, never coerced to zero. An empty numeric
//! set yields `0.0` for every op, with the group's sample count exposed in
//! [`AggregationResult::group_counts`] so callers can tell a true zero from
//! an empty set.

use crate::event::SharedEvent;
use crate::window::Window;
use indexmap::IndexMap;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use windrose_core::{canonical_group_key, EngineError, Value, UNGROUPED_KEY};

/// Numeric reduction applied per group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AggregateOp {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    StdDev,
    /// Nearest-rank percentile, `p` in `[0, 1]`.
    Percentile(f64),
}

impl AggregateOp {
    fn requires_field(&self) -> bool {
        !matches!(self, AggregateOp::Count)
    }
}

impl FromStr for AggregateOp {
    type Err = EngineError;

    /// Parses the connector-facing op name. `percentile` carries its
    /// parameter separately ([`AggregationConfigBuilder::percentile`]), so
    /// the bare name maps to the p99 default here.
    fn from_str(s: &str) -> Result<Self, EngineError> {
        match s {
            "count" => Ok(AggregateOp::Count),
            "sum" => Ok(AggregateOp::Sum),
            "avg" => Ok(AggregateOp::Avg),
            "min" => Ok(AggregateOp::Min),
            "max" => Ok(AggregateOp::Max),
            "stddev" => Ok(AggregateOp::StdDev),
            "percentile" => Ok(AggregateOp::Percentile(0.99)),
            other => Err(EngineError::Configuration(format!(
                "unknown aggregation type `{}`",
                other
            ))),
        }
    }
}

/// Configuration for one aggregation pass.
#[derive(Debug, Clone)]
pub struct AggregationConfig {
    pub op: AggregateOp,
    pub field: Option<String>,
    pub group_by: Vec<String>,
}

impl AggregationConfig {
    pub fn builder() -> AggregationConfigBuilder {
        AggregationConfigBuilder::default()
    }

    fn validate(&self) -> Result<(), EngineError> {
        if let AggregateOp::Percentile(p) = self.op {
            if !(0.0..=1.0).contains(&p) {
                return Err(EngineError::Configuration(format!(
                    "percentile must be in [0, 1], got {}",
                    p
                )));
            }
        }
        if self.op.requires_field() && self.field.is_none() {
            return Err(EngineError::Configuration(format!(
                "aggregation {:?} requires a field",
                self.op
            )));
        }
        Ok(())
    }
}

/// Fluent assembly of an [`AggregationConfig`].
#[derive(Debug, Default)]
pub struct AggregationConfigBuilder {
    op: Option<AggregateOp>,
    field: Option<String>,
    group_by: Vec<String>,
}

impl AggregationConfigBuilder {
    pub fn op(mut self, op: AggregateOp) -> Self {
        self.op = Some(op);
        self
    }

    pub fn percentile(mut self, p: f64) -> Self {
        self.op = Some(AggregateOp::Percentile(p));
        self
    }

    pub fn field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn group_by(mut self, field: impl Into<String>) -> Self {
        self.group_by.push(field.into());
        self
    }

    pub fn build(self) -> Result<AggregationConfig, EngineError> {
        let config = AggregationConfig {
            op: self
                .op
                .ok_or_else(|| EngineError::Configuration("aggregation type not set".into()))?,
            field: self.field,
            group_by: self.group_by,
        };
        config.validate()?;
        Ok(config)
    }
}

/// One aggregation result per window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationResult {
    pub window_key: String,
    /// Group key -> reduced value. [`UNGROUPED_KEY`] when no grouping.
    pub groups: IndexMap<String, f64>,
    /// Group key -> number of numeric samples the reduction saw
    /// (event count for `count`).
    pub group_counts: IndexMap<String, usize>,
}

/// Aggregates every window, preserving window iteration order.
pub fn aggregate(
    windows: &IndexMap<String, Window>,
    config: &AggregationConfig,
) -> Result<Vec<AggregationResult>, EngineError> {
    config.validate()?;

    let entries: Vec<(&String, &Window)> = windows.iter().collect();
    let results = entries
        .par_iter()
        .map(|(key, window)| aggregate_window(key, window, config))
        .collect();
    Ok(results)
}

fn aggregate_window(key: &str, window: &Window, config: &AggregationConfig) -> AggregationResult {
    let mut groups = IndexMap::new();
    let mut group_counts = IndexMap::new();

    for (group_key, events) in partition_groups(&window.events, &config.group_by) {
        let (value, samples) = reduce(&events, config);
        groups.insert(group_key.clone(), value);
        group_counts.insert(group_key, samples);
    }

    AggregationResult {
        window_key: key.to_string(),
        groups,
        group_counts,
    }
}

/// Partitions events by the canonical encoding of their group-by field
/// values. A missing field contributes JSON `null` to the tuple, keeping the
/// group stable and distinct from the ungrouped sentinel.
fn partition_groups<'a>(
    events: &'a [SharedEvent],
    group_by: &[String],
) -> IndexMap<String, Vec<&'a SharedEvent>> {
    let mut groups: IndexMap<String, Vec<&SharedEvent>> = IndexMap::new();
    if group_by.is_empty() {
        groups.insert(UNGROUPED_KEY.to_string(), events.iter().collect());
        return groups;
    }

    for event in events {
        let tuple: Vec<Value> = group_by
            .iter()
            .map(|f| event.get(f).cloned().unwrap_or(Value::Null))
            .collect();
        groups
            .entry(canonical_group_key(&tuple))
            .or_default()
            .push(event);
    }
    groups
}

fn reduce(events: &[&SharedEvent], config: &AggregationConfig) -> (f64, usize) {
    if let AggregateOp::Count = config.op {
        return (events.len() as f64, events.len());
    }

    // validate() guarantees a field for every non-count op
    let field = config.field.as_deref().unwrap_or_default();
    let values: Vec<f64> = events.iter().filter_map(|e| e.get_float(field)).collect();
    let n = values.len();
    if n == 0 {
        return (0.0, 0);
    }

    let value = match config.op {
        AggregateOp::Count => unreachable!(),
        AggregateOp::Sum => values.iter().sum(),
        AggregateOp::Avg => values.iter().sum::<f64>() / n as f64,
        AggregateOp::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
        AggregateOp::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        AggregateOp::StdDev => welford_stddev(&values),
        AggregateOp::Percentile(p) => nearest_rank(values, p),
    };
    (value, n)
}

/// Sample standard deviation via Welford's single-pass algorithm.
/// Fewer than two samples yield `0.0`.
fn welford_stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let mut mean = 0.0;
    let mut m2 = 0.0;
    for (i, x) in values.iter().enumerate() {
        let delta = x - mean;
        mean += delta / (i + 1) as f64;
        m2 += delta * (x - mean);
    }
    (m2 / (values.len() - 1) as f64).sqrt()
}

/// Nearest-rank percentile: sort ascending, index `floor(p * (n - 1))`.
fn nearest_rank(mut values: Vec<f64>, p: f64) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    let idx = (p * (values.len() - 1) as f64).floor() as usize;
    values[idx]
}
