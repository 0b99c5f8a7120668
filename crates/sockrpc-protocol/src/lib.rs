//! Codec capability, framing and request/response types for sockrpc.
//!
//! # Protocol Overview
//!
//! Each connection carries exactly one request frame and one response frame.
//! A frame is an encoded body followed by the codec's terminator byte. With
//! the default [`JsonCodec`] that is one line of compact JSON:
//!
//! ```text
//! -> {"method":"Echo","params":[{"msg":"hi"}],"id":1}\n
//! <- {"id":1,"result":{"Msg":"hi","Code":999}}\n
//! ```
//!
//! # Example
//!
//! ```rust
//! use sockrpc_protocol::{JsonCodec, Response, decode_request, encode_response};
//!
//! let request = decode_request(&JsonCodec, br#"{"method":"Echo","id":1}"#).unwrap();
//! let response = Response::success(request.id, serde_json::json!("ok"));
//! let frame = encode_response(&JsonCodec, &response).unwrap();
//! assert_eq!(frame, b"{\"id\":1,\"result\":\"ok\"}\n");
//! ```

mod codec;
mod error;
mod types;

pub use codec::{Codec, JsonCodec, NEWLINE};
pub use error::{ProtocolError, ProtocolResult};
pub use types::{
    DecodeFailure, Outcome, Params, Request, RequestId, Response, decode_request,
    encode_response,
};

/// Default maximum frame size (10 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;
