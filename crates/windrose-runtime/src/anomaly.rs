//! Statistical outlier detection
//!
//! Flags events whose numeric field value deviates from a trailing
//! reference window of preceding values. Two methods:
//! - Z-score: deviation measured in standard deviations from the reference
//!   mean
//! - IQR: values outside `[Q1 - k*IQR, Q3 + k*IQR]` with `k` derived from
//!   the configured sensitivity (`k = sensitivity / 2`, so the default
//!   sensitivity of 3.0 reproduces the textbook 1.5 multiplier)
//!
//! Detection is pure: the same input always yields the same anomaly set.
//! Nothing is flagged until the reference holds at least two values.

use crate::event::SharedEvent;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use windrose_core::EngineError;

const EPSILON: f64 = 1e-12;

/// Outlier detection method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnomalyMethod {
    ZScore,
    Iqr,
}

impl FromStr for AnomalyMethod {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, EngineError> {
        match s {
            "zscore" => Ok(AnomalyMethod::ZScore),
            "iqr" => Ok(AnomalyMethod::Iqr),
            other => Err(EngineError::Configuration(format!(
                "unknown anomaly method `{}`",
                other
            ))),
        }
    }
}

/// Configuration for an anomaly detection pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyConfig {
    pub method: AnomalyMethod,
    /// Field of `event.data` holding the observed numeric value.
    pub field: String,
    /// Maximum size of the trailing reference window. A shorter reference
    /// (early in the batch) is used as-is.
    pub window_size: usize,
    /// Z-score threshold, or twice the IQR fence multiplier.
    pub sensitivity: f64,
}

impl AnomalyConfig {
    fn validate(&self) -> Result<(), EngineError> {
        if self.window_size < 2 {
            return Err(EngineError::Configuration(format!(
                "anomaly window_size must be at least 2, got {}",
                self.window_size
            )));
        }
        if self.sensitivity <= 0.0 {
            return Err(EngineError::Configuration(format!(
                "anomaly sensitivity must be positive, got {}",
                self.sensitivity
            )));
        }
        Ok(())
    }
}

/// A flagged outlier.
#[derive(Debug, Clone)]
pub struct Anomaly {
    pub event: SharedEvent,
    /// Reference-window mean.
    pub expected_value: f64,
    /// Method-specific distance: standard deviations for z-score, distance
    /// outside the fence for IQR.
    pub deviation: f64,
    /// Deviation relative to the threshold that triggered the flag.
    pub severity: f64,
}

/// Scans the batch in timestamp order, comparing each event's field value
/// against the values of up to `window_size` preceding events.
///
/// Events with a missing or non-numeric field neither get evaluated nor
/// enter the reference window. An insufficient reference yields no
/// anomalies, never an error.
pub fn detect_anomalies(
    events: &[SharedEvent],
    config: &AnomalyConfig,
) -> Result<Vec<Anomaly>, EngineError> {
    config.validate()?;

    let mut sorted: Vec<SharedEvent> = events.iter().map(Arc::clone).collect();
    sorted.sort_by_key(|e| e.timestamp);

    let mut reference: VecDeque<f64> = VecDeque::with_capacity(config.window_size);
    let mut anomalies = Vec::new();

    for event in &sorted {
        let Some(x) = event.get_float(&config.field) else {
            continue;
        };

        if reference.len() >= 2 {
            let flagged = match config.method {
                AnomalyMethod::ZScore => zscore_check(&reference, x, config.sensitivity),
                AnomalyMethod::Iqr => iqr_check(&reference, x, config.sensitivity),
            };
            if let Some((expected_value, deviation, severity)) = flagged {
                anomalies.push(Anomaly {
                    event: Arc::clone(event),
                    expected_value,
                    deviation,
                    severity,
                });
            }
        }

        reference.push_back(x);
        if reference.len() > config.window_size {
            reference.pop_front();
        }
    }

    Ok(anomalies)
}

fn mean_of(reference: &VecDeque<f64>) -> f64 {
    reference.iter().sum::<f64>() / reference.len() as f64
}

fn zscore_check(reference: &VecDeque<f64>, x: f64, sensitivity: f64) -> Option<(f64, f64, f64)> {
    let n = reference.len() as f64;
    let mean = mean_of(reference);
    let variance = reference.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let stddev = variance.sqrt();

    if stddev < EPSILON {
        // Constant reference: any differing value is an outlier; deviation
        // degrades to the absolute distance.
        let distance = (x - mean).abs();
        return (distance > 1e-9).then_some((mean, distance, 1.0));
    }

    let z = (x - mean).abs() / stddev;
    (z > sensitivity).then(|| (mean, z, z / sensitivity))
}

fn iqr_check(reference: &VecDeque<f64>, x: f64, sensitivity: f64) -> Option<(f64, f64, f64)> {
    let mut sorted: Vec<f64> = reference.iter().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    // Nearest rank: rounding keeps the fence non-degenerate on short
    // references, where flooring would collapse Q1 and Q3 onto one sample.
    let rank = |p: f64| sorted[(p * (sorted.len() - 1) as f64).round() as usize];
    let q1 = rank(0.25);
    let q3 = rank(0.75);
    let iqr = q3 - q1;
    let k = sensitivity / 2.0;
    let low = q1 - k * iqr;
    let high = q3 + k * iqr;

    if x >= low && x <= high {
        return None;
    }

    let distance = if x < low { low - x } else { x - high };
    let severity = if iqr > EPSILON { distance / (k * iqr) } else { 1.0 };
    Some((mean_of(reference), distance, severity))
}
