//! Windrose Runtime - In-process event-stream processing engine
//!
//! Partitions timestamped key/value events into time windows, aggregates
//! them, detects temporal patterns and statistical anomalies, joins event
//! sequences by key within a time bound, and shields downstream consumers
//! through configurable backpressure.
//!
//! Each public operation is batch-oriented and synchronous: a full event
//! sequence in, a complete result out. The backpressure controller is the
//! only component carrying state across calls.

pub mod aggregate;
pub mod anomaly;
pub mod backpressure;
pub mod connector;
pub mod event;
pub mod join;
pub mod metrics;
pub mod pattern;
pub mod pipeline;
pub mod transform;
pub mod window;

pub use aggregate::{
    aggregate, AggregateOp, AggregationConfig, AggregationConfigBuilder, AggregationResult,
};
pub use anomaly::{detect_anomalies, Anomaly, AnomalyConfig, AnomalyMethod};
pub use backpressure::{
    AutoScalingPolicy, BackpressureConfig, BackpressureController, BackpressureMetrics,
    BackpressureStrategy,
};
pub use connector::{BatchSource, ConnectorMetrics, SourceConnector};
pub use event::{FxIndexMap, SharedEvent, StreamEvent};
pub use join::{enrich_stream, join_streams, JoinType, JoinedRecord, StreamJoinConfig};
pub use metrics::EngineMetrics;
pub use pattern::{CepEngine, Pattern, PatternKind, PatternMatch};
pub use pipeline::{PipelineConfig, StreamPipeline};
pub use transform::Transform;
pub use window::{assign_windows, RawWindowConfig, Window, WindowPartitioner, WindowSpec};
