//! Error types and result aliases for the recorder.
//!
//! This module defines the core error type [`HarError`] and the [`Result`] type alias
//! used throughout the crate. Errors raised while handling a single network event
//! never cross the recorder's task boundary: they are logged and the event is dropped.

use crate::protocol::TransactionId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Enrichment fetch failed for {id}: {reason}")]
    EnrichmentFetch { id: TransactionId, reason: String },

    #[error("Timed out waiting for request of {0}")]
    CorrelationTimeout(TransactionId),

    #[error("Malformed {method} event: {reason}")]
    MalformedEvent { method: String, reason: String },

    #[error("Unknown event: {0}")]
    UnknownEvent(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid filter pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Recorder error: {0}")]
    RecorderError(String),

    #[error("Emission sink is closed")]
    SinkClosed,
}

impl HarError {
    /// Wrap a collaborator failure during body or cookie retrieval.
    pub fn enrichment(id: &TransactionId, reason: impl std::fmt::Display) -> Self {
        HarError::EnrichmentFetch {
            id: id.clone(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HarError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_display() {
        let err = HarError::Transport("socket closed".to_string());
        assert_eq!(err.to_string(), "Transport error: socket closed");
    }

    #[test]
    fn test_enrichment_error_display() {
        let err = HarError::enrichment(&TransactionId::from("42.1"), "No resource with given identifier");
        assert_eq!(
            err.to_string(),
            "Enrichment fetch failed for 42.1: No resource with given identifier"
        );
    }

    #[test]
    fn test_correlation_timeout_display() {
        let err = HarError::CorrelationTimeout(TransactionId::from("7"));
        assert_eq!(err.to_string(), "Timed out waiting for request of 7");
    }

    #[test]
    fn test_malformed_event_display() {
        let err = HarError::MalformedEvent {
            method: "Network.responseReceived".to_string(),
            reason: "missing field `response`".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Malformed Network.responseReceived event: missing field `response`"
        );
    }

    #[test]
    fn test_serialization_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: HarError = json_err.into();

        match err {
            HarError::SerializationError(_) => {}
            _ => panic!("Expected SerializationError"),
        }
    }

    #[test]
    fn test_pattern_error_conversion() {
        let regex_err = regex::Regex::new("(unclosed").unwrap_err();
        let err: HarError = regex_err.into();
        assert!(err.to_string().starts_with("Invalid filter pattern"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: HarError = io_err.into();

        match err {
            HarError::IoError(_) => {}
            _ => panic!("Expected IoError"),
        }
    }
}
