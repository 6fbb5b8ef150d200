//! Error types for the wire layer.

use thiserror::Error;

/// Errors raised while moving data across the wire boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
    /// A runtime value has no wire representation (cycle, non-finite float,
    /// external handle, ...).
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Wire input could not be parsed or does not match the expected schema.
    #[error("malformed wire data: {0}")]
    MalformedWireData(String),

    /// A buffer list contained something other than bytes.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: String,
    },
}

impl WireError {
    /// The error kind name reported to runtime code.
    pub fn kind(&self) -> &'static str {
        match self {
            WireError::Serialization(_) => "SerializationError",
            WireError::MalformedWireData(_) => "MalformedWireDataError",
            WireError::TypeMismatch { .. } => "TypeMismatchError",
        }
    }
}

/// Result type alias for wire operations.
pub type Result<T> = std::result::Result<T, WireError>;
