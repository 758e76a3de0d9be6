//! Admission control in front of downstream stages
//!
//! The controller enforces a buffer-size ceiling with one of three
//! strategies and exposes an advisory auto-scaling counter. It is the one
//! stateful, call-spanning component of the engine: the buffer and scaling
//! counters persist for the controller's lifetime and are reset only by
//! reconstructing it. Internally synchronized, so concurrent producers may
//! share one controller.
//!
//! Buffer overflow is an expected, metered condition surfaced through
//! [`BackpressureMetrics`], never an error.

use crate::event::SharedEvent;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;
use windrose_core::EngineError;

/// Strategy applied when load exceeds what downstream absorbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackpressureStrategy {
    /// Admit up to remaining capacity, discard the rest (oldest-favored).
    Drop,
    /// Keep each event independently with probability `sampling_rate`.
    Sample,
    /// Admit up to `buffer_size`; no drops below capacity.
    Buffer,
}

impl FromStr for BackpressureStrategy {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, EngineError> {
        match s {
            "drop" => Ok(BackpressureStrategy::Drop),
            "sample" => Ok(BackpressureStrategy::Sample),
            "buffer" => Ok(BackpressureStrategy::Buffer),
            other => Err(EngineError::Configuration(format!(
                "unknown backpressure strategy `{}`",
                other
            ))),
        }
    }
}

/// Advisory auto-scaling policy. The controller only applies requested
/// deltas and enforces bounds; deciding *when* to scale is an external
/// scheduler's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoScalingPolicy {
    pub min_instances: u32,
    pub max_instances: u32,
    pub target_lag: u64,
    pub scale_up_threshold: f64,
    pub scale_down_threshold: f64,
    /// Deltas requested inside this window after a scaling change are
    /// ignored.
    pub cooldown: Duration,
}

impl Default for AutoScalingPolicy {
    fn default() -> Self {
        Self {
            min_instances: 1,
            max_instances: 8,
            target_lag: 1_000,
            scale_up_threshold: 0.8,
            scale_down_threshold: 0.2,
            cooldown: Duration::from_secs(60),
        }
    }
}

/// Controller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackpressureConfig {
    pub strategy: BackpressureStrategy,
    pub buffer_size: usize,
    /// Retention probability for [`BackpressureStrategy::Sample`].
    pub sampling_rate: f64,
    pub auto_scaling: Option<AutoScalingPolicy>,
}

impl Default for BackpressureConfig {
    fn default() -> Self {
        Self {
            strategy: BackpressureStrategy::Buffer,
            buffer_size: 10_000,
            sampling_rate: 1.0,
            auto_scaling: None,
        }
    }
}

/// Snapshot of controller counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BackpressureMetrics {
    pub dropped_events: u64,
    /// Events admitted but not yet drained by the consumer.
    pub current_lag: u64,
    /// `min(1, buffered / buffer_size)`.
    pub buffer_utilization: f64,
    /// Admitted events per second since construction.
    pub throughput: f64,
    pub consumer_instances: u32,
}

/// Buffer-mutating admission controller, safe for concurrent producers.
#[derive(Debug)]
pub struct BackpressureController {
    config: BackpressureConfig,
    buffer: Mutex<VecDeque<SharedEvent>>,
    dropped: AtomicU64,
    accepted: AtomicU64,
    consumer_instances: AtomicU32,
    last_scale: Mutex<Option<Instant>>,
    started: Instant,
}

impl BackpressureController {
    pub fn new(config: BackpressureConfig) -> Result<Self, EngineError> {
        if config.buffer_size == 0 {
            return Err(EngineError::Configuration(
                "backpressure buffer_size must be positive".into(),
            ));
        }
        if config.strategy == BackpressureStrategy::Sample
            && !(0.0..=1.0).contains(&config.sampling_rate)
        {
            return Err(EngineError::Configuration(format!(
                "sampling_rate must be in [0, 1], got {}",
                config.sampling_rate
            )));
        }
        if let Some(policy) = &config.auto_scaling {
            if policy.min_instances == 0 || policy.min_instances > policy.max_instances {
                return Err(EngineError::Configuration(format!(
                    "auto-scaling bounds [{}, {}] are invalid",
                    policy.min_instances, policy.max_instances
                )));
            }
        }

        let initial_instances = config
            .auto_scaling
            .as_ref()
            .map(|p| p.min_instances)
            .unwrap_or(1);

        Ok(Self {
            config,
            buffer: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
            accepted: AtomicU64::new(0),
            consumer_instances: AtomicU32::new(initial_instances),
            last_scale: Mutex::new(None),
            started: Instant::now(),
        })
    }

    pub fn config(&self) -> &BackpressureConfig {
        &self.config
    }

    /// Admits a batch per the configured strategy, returning the events
    /// accepted downstream. Rejected events are counted, never surfaced as
    /// errors.
    pub fn handle_events(&self, events: &[SharedEvent]) -> Vec<SharedEvent> {
        let mut buffer = self
            .buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let admitted: Vec<SharedEvent> = match self.config.strategy {
            BackpressureStrategy::Drop | BackpressureStrategy::Buffer => {
                let capacity_left = self.config.buffer_size.saturating_sub(buffer.len());
                events.iter().take(capacity_left).map(Arc::clone).collect()
            }
            BackpressureStrategy::Sample => {
                // Sampling is the shedding mechanism; no capacity check here.
                let mut rng = rand::thread_rng();
                events
                    .iter()
                    .filter(|_| rng.gen::<f64>() < self.config.sampling_rate)
                    .map(Arc::clone)
                    .collect()
            }
        };

        let rejected = events.len() - admitted.len();
        if rejected > 0 {
            self.dropped.fetch_add(rejected as u64, Ordering::Relaxed);
            debug!(
                "backpressure ({:?}): {} admitted, {} dropped",
                self.config.strategy,
                admitted.len(),
                rejected
            );
        }
        self.accepted
            .fetch_add(admitted.len() as u64, Ordering::Relaxed);
        buffer.extend(admitted.iter().map(Arc::clone));

        admitted
    }

    /// Drains the buffered events, modeling downstream consumption.
    pub fn take_buffered(&self) -> Vec<SharedEvent> {
        let mut buffer = self
            .buffer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        buffer.drain(..).collect()
    }

    pub fn metrics(&self) -> BackpressureMetrics {
        let buffered = {
            let buffer = self
                .buffer
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            buffer.len()
        };
        let elapsed = self.started.elapsed().as_secs_f64().max(f64::MIN_POSITIVE);

        BackpressureMetrics {
            dropped_events: self.dropped.load(Ordering::Relaxed),
            current_lag: buffered as u64,
            buffer_utilization: (buffered as f64 / self.config.buffer_size as f64).min(1.0),
            throughput: self.accepted.load(Ordering::Relaxed) as f64 / elapsed,
            consumer_instances: self.consumer_instances.load(Ordering::Relaxed),
        }
    }

    /// Applies a consumer-count delta, clamped to the policy bounds
    /// (`[1, u32::MAX]` without a policy). A delta requested within the
    /// cooldown window of the previous change is ignored. Advisory only:
    /// no worker pool is resized here.
    pub fn scale_consumers(&self, delta: i64) -> u32 {
        let (min, max, cooldown) = match &self.config.auto_scaling {
            Some(p) => (p.min_instances, p.max_instances, p.cooldown),
            None => (1, u32::MAX, Duration::ZERO),
        };

        let mut last_scale = self
            .last_scale
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(last) = *last_scale {
            if last.elapsed() < cooldown {
                return self.consumer_instances.load(Ordering::Relaxed);
            }
        }

        let current = self.consumer_instances.load(Ordering::Relaxed);
        let target = (current as i64 + delta).clamp(min as i64, max as i64) as u32;
        if target != current {
            self.consumer_instances.store(target, Ordering::Relaxed);
            *last_scale = Some(Instant::now());
            debug!("consumer instances scaled {} -> {}", current, target);
        }
        target
    }
}
