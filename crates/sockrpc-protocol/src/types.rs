//! Request and response types for the sockrpc protocol.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::codec::Codec;
use crate::error::{ProtocolError, ProtocolResult};

/// Keyed arguments passed to a handler.
pub type Params = Map<String, Value>;

/// Request identifier, echoed back verbatim in the response.
///
/// Falsy-but-present values such as `0` or `""` are valid ids. Integers
/// cover the whole `i64` and `u64` range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id that fits in an `i64`.
    Number(i64),
    /// Integer id above `i64::MAX`.
    Unsigned(u64),
    /// String id.
    String(String),
}

impl RequestId {
    /// Extracts an id from a decoded JSON value.
    fn from_value(value: Value) -> ProtocolResult<Self> {
        match value {
            Value::Number(n) => n
                .as_i64()
                .map(Self::Number)
                .or_else(|| n.as_u64().map(Self::Unsigned))
                .ok_or_else(|| ProtocolError::InvalidField {
                    field: "id",
                    message: format!("{n} is not an integer"),
                }),
            Value::String(s) => Ok(Self::String(s)),
            other => Err(ProtocolError::InvalidField {
                field: "id",
                message: format!("expected a string or integer, found {}", kind_of(&other)),
            }),
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Unsigned(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        Self::Number(id)
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        i64::try_from(id).map_or(Self::Unsigned(id), Self::Number)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::String(id.to_string())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self::String(id)
    }
}

/// A decoded request, valid by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// Name of the method to invoke.
    pub method: String,
    /// Caller-chosen id.
    pub id: RequestId,
    /// Keyed arguments, if any were sent.
    pub params: Option<Params>,
}

impl Request {
    /// Creates a new request.
    pub fn new(
        method: impl Into<String>,
        id: impl Into<RequestId>,
        params: Option<Params>,
    ) -> Self {
        Self {
            method: method.into(),
            id: id.into(),
            params,
        }
    }

    /// Builds a request from a decoded value.
    ///
    /// The wire form is `{"method": <string>, "params": [<object>], "id": <string|number>}`.
    /// `params` may also be a bare object. When it is a sequence only the first
    /// element is used, and it must be an object or absent.
    ///
    /// The id is extracted first so that a failure on `method` or `params`
    /// can still be answered.
    pub fn from_value(value: Value) -> Result<Self, DecodeFailure> {
        let Value::Object(mut object) = value else {
            return Err(DecodeFailure::anonymous(ProtocolError::NotAnObject));
        };

        let id = match object.remove("id") {
            None | Some(Value::Null) => None,
            Some(raw) => Some(RequestId::from_value(raw).map_err(DecodeFailure::anonymous)?),
        };

        let method = match object.remove("method") {
            Some(Value::String(method)) => method,
            None | Some(Value::Null) => {
                return Err(DecodeFailure::new(
                    id,
                    ProtocolError::MissingField { field: "method" },
                ));
            }
            Some(other) => {
                return Err(DecodeFailure::new(
                    id,
                    ProtocolError::InvalidField {
                        field: "method",
                        message: format!("expected a string, found {}", kind_of(&other)),
                    },
                ));
            }
        };

        let params = match params_from_value(object.remove("params")) {
            Ok(params) => params,
            Err(error) => return Err(DecodeFailure::new(id, error)),
        };

        let Some(id) = id else {
            return Err(DecodeFailure::anonymous(ProtocolError::MissingField {
                field: "id",
            }));
        };

        Ok(Self { method, id, params })
    }
}

fn params_from_value(raw: Option<Value>) -> ProtocolResult<Option<Params>> {
    let raw = match raw {
        Some(Value::Array(items)) => items.into_iter().next(),
        other => other,
    };

    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(params)) => Ok(Some(params)),
        Some(other) => Err(ProtocolError::InvalidParams {
            found: other.to_string(),
        }),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A request that could not be decoded.
///
/// `id` is set when it was recovered before the failure, in which case the
/// caller is owed an error response.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct DecodeFailure {
    /// The id, if it could be recovered.
    pub id: Option<RequestId>,
    /// What went wrong.
    #[source]
    pub error: ProtocolError,
}

impl DecodeFailure {
    /// Creates a failure carrying an optional recovered id.
    pub fn new(id: Option<RequestId>, error: ProtocolError) -> Self {
        Self { id, error }
    }

    /// Creates a failure for which no id could be recovered.
    pub fn anonymous(error: ProtocolError) -> Self {
        Self { id: None, error }
    }

    /// Builds the error response owed to the caller.
    ///
    /// Hands the failure back when no id was recovered, since such a request
    /// cannot be answered.
    pub fn into_response(self) -> Result<Response, Self> {
        match self.id {
            Some(id) => Ok(Response::error(id, self.error.to_string())),
            None => Err(self),
        }
    }
}

/// Decodes a frame body into a request.
pub fn decode_request(codec: &dyn Codec, body: &[u8]) -> Result<Request, DecodeFailure> {
    let value = codec.decode(body).map_err(DecodeFailure::anonymous)?;
    Request::from_value(value)
}

/// Either the handler's value or an error description, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The handler's return value.
    Result(Value),
    /// Human-readable description of the failure.
    Error(String),
}

/// A response frame.
///
/// Serializes as `{"id": .., "result": ..}` or `{"id": .., "error": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Echo of the request id.
    pub id: RequestId,
    /// Result or error.
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl Response {
    /// Creates a success response.
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id,
            outcome: Outcome::Result(result),
        }
    }

    /// Creates an error response.
    pub fn error(id: RequestId, message: impl Into<String>) -> Self {
        Self {
            id,
            outcome: Outcome::Error(message.into()),
        }
    }

    /// Returns true if this response carries a result.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Result(_))
    }

    /// Returns the result, if any.
    pub fn result(&self) -> Option<&Value> {
        match &self.outcome {
            Outcome::Result(value) => Some(value),
            Outcome::Error(_) => None,
        }
    }

    /// Returns the error description, if any.
    pub fn error_message(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Result(_) => None,
            Outcome::Error(message) => Some(message),
        }
    }
}

/// Encodes a response into a complete frame, terminator included.
pub fn encode_response(codec: &dyn Codec, response: &Response) -> ProtocolResult<Vec<u8>> {
    let value = serde_json::to_value(response)?;
    codec.encode_frame(&value)
}
