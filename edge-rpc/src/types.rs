//! Rust definitions of the JSON-RPC 2.0 envelope pieces the engine reads and writes.
//!
//! Outgoing requests are built as raw [`JsonValue`] documents rather than typed structs, because
//! the caller owns the payload and the engine only stamps an `id` on it.  Replies produced by the
//! method table use the typed [`Response`].
use std::fmt;

use itertools::Itertools;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

/// Re-export the pieces of the JSON-RPC protocol that `jsonrpsee` already models well.
pub use jsonrpsee_types::{error::ErrorCode, params::TwoPointZero};
pub use serde_json::Value as JsonValue;

/// Field carrying the request identifier in every request and response
pub const ID_FIELD: &str = "id";

/// Request Id
///
/// Ids generated by this crate are always strings, but the remote peer is free to use any valid
/// JSON-RPC id in requests it sends us.  Two ids are equal only if they are the same variant with
/// the same full value.
#[derive(Debug, PartialEq, Clone, Hash, Eq, Deserialize, Serialize, PartialOrd, Ord)]
#[serde(untagged)]
pub enum Id {
    /// Null
    Null,
    /// Numeric id, any JSON integer that fits in 64 bits signed
    Number(i64),
    /// String id
    Str(String),
}

impl Id {
    /// Interpret a JSON value as a request id.
    ///
    /// Returns `None` for values that can't be an id (objects, arrays, booleans, fractions).
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Null => Some(Id::Null),
            JsonValue::String(s) => Some(Id::Str(s.clone())),
            JsonValue::Number(n) => n.as_i64().map(Id::Number),
            _ => None,
        }
    }

    /// Extract the `id` field of a JSON-RPC message, if it has a usable one.
    pub fn of_message(message: &JsonValue) -> Option<Self> {
        message.get(ID_FIELD).and_then(Self::from_json)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Id::Null => f.write_str("null"),
            Id::Number(n) => write!(f, "{n}"),
            Id::Str(s) => f.write_str(s),
        }
    }
}

impl From<String> for Id {
    fn from(value: String) -> Self {
        Id::Str(value)
    }
}

impl From<&str> for Id {
    fn from(value: &str) -> Self {
        Id::Str(value.to_string())
    }
}

impl From<Id> for JsonValue {
    fn from(id: Id) -> Self {
        match id {
            Id::Null => JsonValue::Null,
            Id::Number(n) => n.into(),
            Id::Str(s) => s.into(),
        }
    }
}

/// Build the base envelope of an outgoing request: `{"jsonrpc":"2.0","method":..,"params":..}`.
///
/// The `id` is deliberately absent; it's assigned when the request is built by the engine.
/// Missing params become an empty object, which is what the protocol translators expect.
pub fn base_request(method: impl Into<String>, params: impl Into<Option<JsonValue>>) -> JsonValue {
    let params = params
        .into()
        .unwrap_or_else(|| JsonValue::Object(Default::default()));
    serde_json::json!({
        "jsonrpc": TwoPointZero,
        "method": method.into(),
        "params": params,
    })
}

/// Serialize a JSON document compactly with the keys of every object sorted by name.
///
/// This doesn't depend on whether `serde_json` was built with `preserve_order`, so wire captures
/// of the same request are always byte-identical.
pub fn to_canonical_string(value: &JsonValue) -> serde_json::Result<String> {
    serde_json::to_string(&Canonical(value))
}

struct Canonical<'a>(&'a JsonValue);

impl Serialize for Canonical<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0 {
            JsonValue::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (key, value) in map.iter().sorted_by(|(a, _), (b, _)| a.cmp(b)) {
                    out.serialize_entry(key, &Canonical(value))?;
                }
                out.end()
            }
            JsonValue::Array(items) => serializer.collect_seq(items.iter().map(Canonical)),
            other => other.serialize(serializer),
        }
    }
}

/// JSON-RPC response object as defined in the [spec](https://www.jsonrpc.org/specification#response_object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    /// JSON-RPC version.
    pub jsonrpc: TwoPointZero,
    /// Payload which can be result or error.
    #[serde(flatten)]
    pub payload: ResponsePayload,
    /// Request ID
    pub id: Id,
}

impl Response {
    pub fn new(id: Id, payload: ResponsePayload) -> Self {
        Self {
            jsonrpc: TwoPointZero,
            payload,
            id,
        }
    }

    /// Create a owned successful response
    pub fn success(id: Id, result: JsonValue) -> Self {
        Self::new(id, ResponsePayload::Success(SuccessResponse { result }))
    }

    /// Create an error response
    pub fn error(
        id: Id,
        code: ErrorCode,
        message: impl Into<String>,
        data: impl Into<Option<JsonValue>>,
    ) -> Self {
        Self::error_detail(id, ErrorDetails::new(code, message, data))
    }

    /// Create an error response from already-assembled error details
    pub fn error_detail(id: Id, details: ErrorDetails) -> Self {
        Self::new(id, ResponsePayload::Error(details.into()))
    }
}

/// Possible payloads of a JSON RPC response
///
/// This is an `untagged` enum so that serde will try to deserialize into each variant in order
/// until one succeeds.  This works because successs responses should have `result` and error
/// responses should have `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResponsePayload {
    /// Corresponds to failed JSON-RPC response with a error object with the field `error.
    Error(ErrorResponse),
    /// Corresponds to successful JSON-RPC response with the field `result`.
    Success(SuccessResponse),
}

impl From<crate::method::MethodResult> for ResponsePayload {
    fn from(result: crate::method::MethodResult) -> Self {
        match result {
            Ok(result) => ResponsePayload::Success(result.into()),
            Err(details) => ResponsePayload::Error(details.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub result: JsonValue,
}

impl From<JsonValue> for SuccessResponse {
    fn from(result: JsonValue) -> Self {
        Self { result }
    }
}

/// [Failed JSON-RPC response object](https://www.jsonrpc.org/specification#error_object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

impl From<ErrorDetails> for ErrorResponse {
    fn from(error: ErrorDetails) -> Self {
        Self { error }
    }
}

/// [JSON-RPC failed response error details](https://www.jsonrpc.org/specification#error_object).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetails {
    /// Code
    pub code: ErrorCode,
    /// Message
    pub message: String,
    /// Optional data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<JsonValue>,
}

impl ErrorDetails {
    pub fn new(code: ErrorCode, message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self {
            code,
            message: message.into(),
            data: data.into(),
        }
    }

    pub fn parse_error(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::ParseError, message, data)
    }
    pub fn invalid_request(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message, data)
    }
    pub fn method_not_found(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::MethodNotFound, message, data)
    }
    pub fn invalid_params(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::InvalidParams, message, data)
    }
    pub fn internal_error(message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::InternalError, message, data)
    }
    pub fn server_error(code: i32, message: impl Into<String>, data: impl Into<Option<JsonValue>>) -> Self {
        Self::new(ErrorCode::ServerError(code), message, data)
    }

    /// Extract the error details from a failed response, if it carries a well-formed `error`
    /// object.
    pub fn of_response(response: &JsonValue) -> Option<Self> {
        response
            .get("error")
            .and_then(|error| serde_json::from_value(error.clone()).ok())
    }
}
