//! Protocol error types.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Failed to serialize or parse a JSON value.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The decoded frame is not a keyed-value set.
    #[error("request is not an object")]
    NotAnObject,

    /// A required key is absent from the request.
    #[error("lack of necessary key: {field}")]
    MissingField { field: &'static str },

    /// A key is present but holds a value of the wrong shape.
    #[error("invalid value for key {field}: {message}")]
    InvalidField {
        field: &'static str,
        message: String,
    },

    /// Params are present but are not a keyed-value set.
    #[error("unknown params format: {found}")]
    InvalidParams { found: String },

    /// A codec produced a frame body that contains its own terminator.
    #[error("codec {codec} emitted its terminator byte 0x{terminator:02x} inside a frame body")]
    TerminatorInBody { codec: &'static str, terminator: u8 },
}
