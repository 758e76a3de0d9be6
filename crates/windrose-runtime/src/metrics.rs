//! Prometheus metrics for the engine

use prometheus::{CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collection for the engine.
///
/// Clones share the same registry, so any stage can record without
/// coordination.
#[derive(Clone)]
pub struct EngineMetrics {
    registry: Arc<Registry>,
    pub events_total: CounterVec,
    pub windows_emitted: CounterVec,
    pub matches_total: CounterVec,
    pub anomalies_total: CounterVec,
    pub events_dropped: CounterVec,
    pub processing_latency: HistogramVec,
    pub buffer_utilization: Gauge,
}

impl EngineMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let events_total = CounterVec::new(
            Opts::new("windrose_events_total", "Total events received"),
            &["event_key"],
        )
        .expect("failed to create events_total counter");

        let windows_emitted = CounterVec::new(
            Opts::new("windrose_windows_emitted", "Windows produced per kind"),
            &["kind"],
        )
        .expect("failed to create windows_emitted counter");

        let matches_total = CounterVec::new(
            Opts::new("windrose_matches_total", "Pattern matches recorded"),
            &["pattern"],
        )
        .expect("failed to create matches_total counter");

        let anomalies_total = CounterVec::new(
            Opts::new("windrose_anomalies_total", "Anomalies flagged per method"),
            &["method"],
        )
        .expect("failed to create anomalies_total counter");

        let events_dropped = CounterVec::new(
            Opts::new("windrose_events_dropped", "Events shed by backpressure"),
            &["strategy"],
        )
        .expect("failed to create events_dropped counter");

        let processing_latency = HistogramVec::new(
            HistogramOpts::new(
                "windrose_processing_latency_seconds",
                "Batch processing latency per stage",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
            ]),
            &["stage"],
        )
        .expect("failed to create processing_latency histogram");

        let buffer_utilization = Gauge::new(
            "windrose_buffer_utilization",
            "Backpressure buffer utilization",
        )
        .expect("failed to create buffer_utilization gauge");

        registry
            .register(Box::new(events_total.clone()))
            .expect("failed to register events_total");
        registry
            .register(Box::new(windows_emitted.clone()))
            .expect("failed to register windows_emitted");
        registry
            .register(Box::new(matches_total.clone()))
            .expect("failed to register matches_total");
        registry
            .register(Box::new(anomalies_total.clone()))
            .expect("failed to register anomalies_total");
        registry
            .register(Box::new(events_dropped.clone()))
            .expect("failed to register events_dropped");
        registry
            .register(Box::new(processing_latency.clone()))
            .expect("failed to register processing_latency");
        registry
            .register(Box::new(buffer_utilization.clone()))
            .expect("failed to register buffer_utilization");

        Self {
            registry: Arc::new(registry),
            events_total,
            windows_emitted,
            matches_total,
            anomalies_total,
            events_dropped,
            processing_latency,
            buffer_utilization,
        }
    }

    pub fn record_event(&self, event_key: &str) {
        self.events_total.with_label_values(&[event_key]).inc();
    }

    pub fn record_windows(&self, kind: &str, count: usize) {
        self.windows_emitted
            .with_label_values(&[kind])
            .inc_by(count as f64);
    }

    pub fn record_match(&self, pattern: &str) {
        self.matches_total.with_label_values(&[pattern]).inc();
    }

    pub fn record_anomaly(&self, method: &str) {
        self.anomalies_total.with_label_values(&[method]).inc();
    }

    pub fn record_dropped(&self, strategy: &str, count: u64) {
        self.events_dropped
            .with_label_values(&[strategy])
            .inc_by(count as f64);
    }

    pub fn record_latency(&self, stage: &str, seconds: f64) {
        self.processing_latency
            .with_label_values(&[stage])
            .observe(seconds);
    }

    /// Get Prometheus text output
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}
