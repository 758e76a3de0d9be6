//! Stateless per-event transforms
//!
//! Map (1:1), filter (0:1), and flat-map (1:N) stages used to reshape
//! events before windowing or after joins. Transforms are pure and
//! order-preserving; flat-map concatenates per-event outputs in input order.

use crate::event::{SharedEvent, StreamEvent};
use std::sync::Arc;

type MapFn = Arc<dyn Fn(&StreamEvent) -> StreamEvent + Send + Sync>;
type FilterFn = Arc<dyn Fn(&StreamEvent) -> bool + Send + Sync>;
type FlatMapFn = Arc<dyn Fn(&StreamEvent) -> Vec<StreamEvent> + Send + Sync>;

/// A stateless event transform.
#[derive(Clone)]
pub enum Transform {
    Map(MapFn),
    Filter(FilterFn),
    FlatMap(FlatMapFn),
}

impl Transform {
    pub fn map(f: impl Fn(&StreamEvent) -> StreamEvent + Send + Sync + 'static) -> Self {
        Transform::Map(Arc::new(f))
    }

    pub fn filter(pred: impl Fn(&StreamEvent) -> bool + Send + Sync + 'static) -> Self {
        Transform::Filter(Arc::new(pred))
    }

    pub fn flat_map(f: impl Fn(&StreamEvent) -> Vec<StreamEvent> + Send + Sync + 'static) -> Self {
        Transform::FlatMap(Arc::new(f))
    }

    /// Applies the transform to a batch, returning the reshaped sequence.
    pub fn apply(&self, events: &[SharedEvent]) -> Vec<SharedEvent> {
        match self {
            Transform::Map(f) => events.iter().map(|e| Arc::new(f(e))).collect(),
            Transform::Filter(pred) => events
                .iter()
                .filter(|e| pred(e))
                .map(Arc::clone)
                .collect(),
            Transform::FlatMap(f) => events
                .iter()
                .flat_map(|e| f(e).into_iter().map(Arc::new))
                .collect(),
        }
    }
}

impl std::fmt::Debug for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Transform::Map(_) => f.write_str("Map(..)"),
            Transform::Filter(_) => f.write_str("Filter(..)"),
            Transform::FlatMap(_) => f.write_str("FlatMap(..)"),
        }
    }
}
