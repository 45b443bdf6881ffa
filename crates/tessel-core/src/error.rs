// crates/tessel-core/src/error.rs

use thiserror::Error;

/// Per-node and transport-level error types for Tessel.
///
/// The coordinator keeps these around as the raw material for its own
/// partial/total classification; see `tessel-farm`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TesselError {
    /// A node explicitly reports absence of the requested key or field.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Failure talking to a single node (transport or remote error).
    #[error("Node error: {0}")]
    Node(String),

    /// Replicas returned disagreeing success payloads for the same write.
    #[error("Variance detected from replication: {0}")]
    Variance(String),

    /// Local storage engine error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Network error (HTTP transport, gossip dispatch).
    #[error("Network error: {0}")]
    Network(String),

    /// Membership hint error (layout mismatch, malformed payload).
    #[error("Hint error: {0}")]
    Hint(String),

    /// Invalid state transition or argument.
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl TesselError {
    /// Whether this error is the "node explicitly reports absence" kind.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TesselError::NotFound(_))
    }
}

impl From<serde_json::Error> for TesselError {
    fn from(e: serde_json::Error) -> Self {
        TesselError::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_is_classified() {
        assert!(TesselError::NotFound("k".into()).is_not_found());
        assert!(!TesselError::Node("boom".into()).is_not_found());
        assert!(!TesselError::Variance("a != b".into()).is_not_found());
    }

    #[test]
    fn serde_errors_map_to_serialization() {
        let err: TesselError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        match err {
            TesselError::Serialization(msg) => assert!(!msg.is_empty()),
            other => panic!("Expected Serialization, got: {:?}", other),
        }
    }
}
