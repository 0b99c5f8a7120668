//! Pluggable wire encoding.
//!
//! A [`Codec`] translates between frame bodies and a [`serde_json::Value`]
//! tree, and names the byte that terminates a frame on the wire:
//!
//! ```text
//! +---------------------------+------------+
//! |  encoded body (N bytes)   | terminator |
//! +---------------------------+------------+
//! ```
//!
//! The framing layer never looks inside the body. It relies on the codec to
//! never emit the terminator byte inside an encoded body, which holds for
//! compact JSON since control characters in strings are always escaped.

use serde_json::Value;

use crate::error::{ProtocolError, ProtocolResult};

/// The newline byte used by [`JsonCodec`] to terminate frames.
pub const NEWLINE: u8 = b'\n';

/// Encode/decode capability plus a frame terminator.
///
/// Implementations must satisfy the round-trip law: `decode(encode(v))` is
/// structurally equal to `v` for every value the encoding can represent.
pub trait Codec: Send + Sync + 'static {
    /// Encodes a value into a frame body (without terminator).
    fn encode(&self, value: &Value) -> ProtocolResult<Vec<u8>>;

    /// Decodes a frame body (terminator already stripped) into a value.
    fn decode(&self, body: &[u8]) -> ProtocolResult<Value>;

    /// Returns the byte that ends a frame.
    fn terminator(&self) -> u8;

    /// Short name used in logs and errors.
    fn name(&self) -> &'static str {
        "custom"
    }

    /// Encodes a value and appends the terminator, producing a full frame.
    ///
    /// Fails with [`ProtocolError::TerminatorInBody`] if the body contains the
    /// terminator, since the peer would split the frame there.
    fn encode_frame(&self, value: &Value) -> ProtocolResult<Vec<u8>> {
        let mut frame = self.encode(value)?;
        let terminator = self.terminator();
        if frame.contains(&terminator) {
            return Err(ProtocolError::TerminatorInBody {
                codec: self.name(),
                terminator,
            });
        }
        frame.push(terminator);
        Ok(frame)
    }
}

/// Compact JSON text, one document per line.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, value: &Value) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, body: &[u8]) -> ProtocolResult<Value> {
        // serde_json accepts trailing whitespace, including a stray terminator.
        Ok(serde_json::from_slice(body)?)
    }

    fn terminator(&self) -> u8 {
        NEWLINE
    }

    fn name(&self) -> &'static str {
        "json"
    }
}
