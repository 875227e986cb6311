//! Error taxonomy for the diagnostic workflow.
//!
//! Propagation policy: collector and generative failures are absorbed
//! below the synthesizer boundary and only ever surface as degraded but
//! valid results. The two hard errors a caller can see are a malformed
//! event and a persistence failure.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RcaError {
    /// Malformed failure event rejected before analysis starts.
    #[error("Invalid failure event: {0}")]
    InvalidEvent(String),

    /// Incident store unreachable or a write failed. The single fatal
    /// failure mode of a diagnosis: a report that cannot be recorded
    /// cannot later be retrieved as history.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Resolution update against an id the store has never seen.
    #[error("Incident not found: {0}")]
    NotFound(String),

    /// Collector fault. Absorbed at the safe-collect boundary; never
    /// escapes the engine.
    #[error("Collector error: {0}")]
    Collector(String),

    /// Generative backend fault. Absorbed by fallback to the pattern
    /// diagnosis; surfaces only as the degraded marker on the report.
    #[error("Generative backend error: {0}")]
    Backend(String),
}

impl From<rusqlite::Error> for RcaError {
    fn from(e: rusqlite::Error) -> Self {
        RcaError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for RcaError {
    fn from(e: serde_json::Error) -> Self {
        RcaError::Persistence(format!("record serialization: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sqlite_errors_map_to_persistence() {
        let err: RcaError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, RcaError::Persistence(_)));
    }

    #[test]
    fn messages_name_the_failing_piece() {
        let err = RcaError::NotFound("rca-123".to_string());
        assert_eq!(err.to_string(), "Incident not found: rca-123");
    }
}
