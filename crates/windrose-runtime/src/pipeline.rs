//! Batch processing pipeline
//!
//! Wires the stages in their canonical order — optional backpressure
//! admission, window assignment, aggregation — and instruments each batch
//! with the engine metrics. CEP and joins consume the raw sequence
//! independently and are driven by the caller.

use crate::aggregate::{aggregate, AggregationConfig, AggregationResult};
use crate::backpressure::{BackpressureConfig, BackpressureController};
use crate::event::{SharedEvent, StreamEvent};
use crate::metrics::EngineMetrics;
use crate::transform::Transform;
use crate::window::{assign_windows, WindowSpec};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;
use windrose_core::EngineError;

/// Configuration for a [`StreamPipeline`].
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub window: WindowSpec,
    pub aggregation: AggregationConfig,
    /// Transforms applied to admitted events before windowing, in order.
    pub transforms: Vec<Transform>,
    pub backpressure: Option<BackpressureConfig>,
}

/// Windowed aggregation pipeline over event batches.
///
/// The pipeline itself is stateless across batches except for the
/// backpressure controller's buffer.
pub struct StreamPipeline {
    config: PipelineConfig,
    backpressure: Option<BackpressureController>,
    metrics: EngineMetrics,
}

impl StreamPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, EngineError> {
        let backpressure = config
            .backpressure
            .clone()
            .map(BackpressureController::new)
            .transpose()?;
        Ok(Self {
            config,
            backpressure,
            metrics: EngineMetrics::new(),
        })
    }

    pub fn metrics(&self) -> &EngineMetrics {
        &self.metrics
    }

    pub fn backpressure(&self) -> Option<&BackpressureController> {
        self.backpressure.as_ref()
    }

    /// Runs one batch through admission, transforms, windowing, and
    /// aggregation.
    pub fn process_batch(
        &self,
        events: Vec<StreamEvent>,
    ) -> Result<Vec<AggregationResult>, EngineError> {
        let started = Instant::now();
        let mut batch: Vec<SharedEvent> = events.into_iter().map(Arc::new).collect();
        for event in &batch {
            self.metrics.record_event(&event.key);
        }

        if let Some(controller) = &self.backpressure {
            let before = controller.metrics().dropped_events;
            batch = controller.handle_events(&batch);
            // the pipeline is the consumer; drain what admission buffered
            controller.take_buffered();

            let snapshot = controller.metrics();
            let strategy = format!("{:?}", controller.config().strategy).to_lowercase();
            self.metrics
                .record_dropped(&strategy, snapshot.dropped_events - before);
            self.metrics
                .buffer_utilization
                .set(snapshot.buffer_utilization);
        }

        for transform in &self.config.transforms {
            batch = transform.apply(&batch);
        }

        let windows = assign_windows(&batch, &self.config.window)?;
        self.metrics
            .record_windows(window_kind(&self.config.window), windows.len());

        let results = aggregate(&windows, &self.config.aggregation)?;
        self.metrics
            .record_latency("batch", started.elapsed().as_secs_f64());
        debug!(
            "batch processed: {} events, {} windows, {} results",
            batch.len(),
            windows.len(),
            results.len()
        );
        Ok(results)
    }
}

fn window_kind(spec: &WindowSpec) -> &'static str {
    match spec {
        WindowSpec::Tumbling { .. } => "tumbling",
        WindowSpec::Sliding { .. } => "sliding",
        WindowSpec::Session { .. } => "session",
        WindowSpec::Custom(_) => "custom",
    }
}
