//! Routing Error Types

use thiserror::Error;

/// Malformed producer input
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Value out of allowed range
    #[error("{field} value {value} is out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    /// NaN or infinite value
    #[error("{0} is not a finite number")]
    NotFinite(&'static str),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// Field present but unusable
    #[error("Invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

/// Inbound message that could not be routed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RouterError {
    /// Not JSON, or JSON of the wrong shape
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Control message with an unrecognized `type`
    #[error("Unknown message type: {0}")]
    UnknownType(String),

    /// Backend reported an error frame
    #[error("Backend error: {0}")]
    Backend(String),

    /// Well-formed but invalid result
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// Failure inside a passive observer
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct ObserverError(pub String);
