//! Record-layer error types.

use thiserror::Error;

/// Errors that can occur while building, validating, or (de)serializing
/// event records.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Appending a unit would exceed the event's fixed capacity.
    #[error("event capacity exceeded")]
    Capacity,

    /// A numeric type code did not map to a registered type.
    #[error("unknown type code {0}")]
    UnknownTypeCode(u16),

    /// A textual type name did not map to a registered type.
    #[error("unknown type name '{0}'")]
    UnknownTypeName(String),

    /// An encoded record would exceed the maximum record size.
    #[error("record too large ({0} bytes)")]
    RecordTooLarge(usize),

    /// A wire record failed structural decoding.
    #[error("malformed record at byte {offset}: {reason}")]
    Malformed { offset: usize, reason: String },

    /// A risk literal could not be parsed.
    #[error("invalid risk value '{0}'")]
    InvalidRisk(String),

    /// An event does not carry the reserved fields its kind requires.
    #[error("schema violation: {0}")]
    Schema(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, ProtoError>;
