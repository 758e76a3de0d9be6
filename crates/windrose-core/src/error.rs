//! Error types shared across the engine surface

/// Errors returned by engine operations.
///
/// Every fallible engine call returns `Result<T, EngineError>`. Configuration
/// problems fail fast and name the offending value; the engine never falls
/// back to a default algorithm on an unrecognized name.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// An event was rejected at ingestion (e.g. missing timestamp).
    /// Defaulting a missing timestamp to "now" is a connector concern,
    /// never done inside the engine.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// An unsupported or out-of-range configuration value.
    /// Contains the unsupported value and the field it was supplied for.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A failure at the connector boundary.
    #[error("Connector error: {0}")]
    Connector(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_names_value() {
        let err = EngineError::Configuration("unknown window type `hopping`".into());
        assert!(err.to_string().contains("hopping"));
    }

    #[test]
    fn test_invalid_event_display() {
        let err = EngineError::InvalidEvent("missing timestamp".into());
        assert_eq!(err.to_string(), "Invalid event: missing timestamp");
    }
}
