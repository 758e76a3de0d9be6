//! # Windrose Core
//!
//! Foundational types for the windrose stream processing engine.
//!
//! This crate provides the data types shared by every stage of the engine:
//!
//! - [`Value`]: JSON-like runtime values carried in event payloads
//! - [`canonical_group_key`]: stable encoding of group-by field tuples
//! - [`EngineError`]: the error type returned across the engine surface
//!
//! ## See Also
//!
//! - `windrose-runtime`: the engine itself (windows, aggregation, CEP,
//!   joins, backpressure)

pub mod error;
pub mod value;

pub use error::EngineError;
pub use value::{canonical_group_key, Value, UNGROUPED_KEY};
