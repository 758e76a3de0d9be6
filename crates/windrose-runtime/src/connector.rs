//! Connector boundary
//!
//! The engine consumes events from an external connector layer through a
//! narrow capability trait: readiness, a metrics snapshot, and a channel
//! subscription. Protocol details (which broker, reconnect policy,
//! credentials) are connector-owned and never cross this boundary.

use crate::event::StreamEvent;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::info;
use windrose_core::EngineError;

/// Throughput snapshot a connector exposes to the engine and operator
/// tooling.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConnectorMetrics {
    pub events_per_second: f64,
    pub bytes_per_second: f64,
    pub records_in: u64,
    pub records_out: u64,
}

/// Source connector capability surface.
///
/// Deliberately not a generic publish/subscribe bus: the engine needs
/// readiness, metrics, and a single event subscription, nothing else.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Identifier of this connector instance.
    fn name(&self) -> &str;

    /// Whether the connector is ready to deliver events. Connection
    /// lifecycle events themselves stay connector-owned.
    fn is_connected(&self) -> bool;

    fn metrics(&self) -> ConnectorMetrics;

    /// Delivers events into the provided channel until the source is
    /// exhausted or stopped.
    async fn subscribe(&mut self, tx: mpsc::Sender<StreamEvent>) -> Result<(), EngineError>;

    async fn stop(&mut self) -> Result<(), EngineError>;
}

/// In-memory source that replays a fixed batch. Used in tests and demos the
/// way a console source would be in production tooling.
pub struct BatchSource {
    name: String,
    batch: Vec<StreamEvent>,
    connected: AtomicBool,
    records_out: AtomicU64,
    bytes_out: AtomicU64,
    started: Instant,
}

impl BatchSource {
    pub fn new(name: impl Into<String>, batch: Vec<StreamEvent>) -> Self {
        Self {
            name: name.into(),
            batch,
            connected: AtomicBool::new(true),
            records_out: AtomicU64::new(0),
            bytes_out: AtomicU64::new(0),
            started: Instant::now(),
        }
    }
}

#[async_trait]
impl SourceConnector for BatchSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn metrics(&self) -> ConnectorMetrics {
        let elapsed = self.started.elapsed().as_secs_f64().max(f64::MIN_POSITIVE);
        let records = self.records_out.load(Ordering::Relaxed);
        ConnectorMetrics {
            events_per_second: records as f64 / elapsed,
            bytes_per_second: self.bytes_out.load(Ordering::Relaxed) as f64 / elapsed,
            records_in: self.batch.len() as u64,
            records_out: records,
        }
    }

    async fn subscribe(&mut self, tx: mpsc::Sender<StreamEvent>) -> Result<(), EngineError> {
        if !self.is_connected() {
            return Err(EngineError::Connector(format!(
                "source `{}` is not connected",
                self.name
            )));
        }
        for event in &self.batch {
            let bytes = serde_json::to_vec(event)
                .map(|b| b.len() as u64)
                .unwrap_or(0);
            tx.send(event.clone())
                .await
                .map_err(|e| EngineError::Connector(format!("channel closed: {}", e)))?;
            self.records_out.fetch_add(1, Ordering::Relaxed);
            self.bytes_out.fetch_add(bytes, Ordering::Relaxed);
        }
        info!(
            "source `{}` replayed {} events",
            self.name,
            self.batch.len()
        );
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), EngineError> {
        self.connected.store(false, Ordering::Relaxed);
        Ok(())
    }
}
