//! After inbound bytes have been decoded, requests and notifications are routed by method name to
//! the matching handler, and responses are routed to the correlator.  [`MethodTable`] does both and
//! is the engine's default [`Dispatch`] implementation.
//!
//! Handlers are plain synchronous functions.  The engine runs on the connection's own task and a
//! handler blocks that task while it runs, so anything slow belongs in a task of its own.
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;

use serde::de::DeserializeOwned;

use crate::dispatch::{Dispatch, Dispatched, InboundEnvelope, OnResponse};
use crate::error::panic_err_to_string;
use crate::types::{ErrorDetails, Id, JsonValue, Response, TwoPointZero};

/// What a method handler produces: the `result` of the reply, or its `error`.
pub type MethodResult = Result<JsonValue, ErrorDetails>;

type MethodFn<T> = Box<dyn Fn(&MethodCall<'_, T>) -> MethodResult + Send + Sync + 'static>;

/// A decoded method call or notification, as seen by its handler.
pub struct MethodCall<'a, T> {
    id: Option<&'a Id>,
    method: &'a str,
    params: Option<&'a JsonValue>,
    connection: &'a T,
}

impl<'a, T> MethodCall<'a, T> {
    /// The request id, or `None` for a notification
    pub fn id(&self) -> Option<&'a Id> {
        self.id
    }

    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }

    pub fn method(&self) -> &'a str {
        self.method
    }

    pub fn raw_params(&self) -> Option<&'a JsonValue> {
        self.params
    }

    /// Deserialize the params into `P`.
    ///
    /// Absent params deserialize from `null`, so an `Option` or unit type accepts them.
    pub fn params<P: DeserializeOwned>(&self) -> Result<P, ErrorDetails> {
        let params = self.params.cloned().unwrap_or_default();
        serde_json::from_value(params).map_err(|e| {
            ErrorDetails::invalid_params(format!("Invalid params for method '{}': {e}", self.method), None)
        })
    }

    /// The connection the call arrived on
    pub fn connection(&self) -> &'a T {
        self.connection
    }
}

/// Table of method handlers, keyed by method name, with a fallback for unknown methods.
pub struct MethodTable<T> {
    methods: HashMap<String, MethodFn<T>>,
    fallback: MethodFn<T>,
}

impl<T: 'static> MethodTable<T> {
    pub fn new() -> Self {
        Self {
            methods: HashMap::new(),
            fallback: Box::new(Self::method_not_found),
        }
    }

    fn method_not_found(call: &MethodCall<'_, T>) -> MethodResult {
        Err(ErrorDetails::method_not_found(
            format!("Unknown method '{}'", call.method()),
            None,
        ))
    }

    /// Register a handler, replacing any previous handler for the same method.
    pub fn register<F>(&mut self, method: impl Into<String>, handler: F)
    where
        F: Fn(&MethodCall<'_, T>) -> MethodResult + Send + Sync + 'static,
    {
        self.methods.insert(method.into(), Box::new(handler));
    }

    /// Builder-style [`Self::register`].
    pub fn with_method<F>(mut self, method: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&MethodCall<'_, T>) -> MethodResult + Send + Sync + 'static,
    {
        self.register(method, handler);
        self
    }

    /// Replace the handler that runs for methods nobody registered.
    pub fn register_fallback<F>(&mut self, handler: F)
    where
        F: Fn(&MethodCall<'_, T>) -> MethodResult + Send + Sync + 'static,
    {
        self.fallback = Box::new(handler);
    }

    pub fn contains(&self, method: &str) -> bool {
        self.methods.contains_key(method)
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Handle one message object (not a batch), returning the reply if one is due.
    fn dispatch_one(
        &self,
        message: &JsonValue,
        connection: &T,
        on_response: &mut OnResponse<'_>,
        protocol_error: &mut bool,
    ) -> Option<Response> {
        let Some(object) = message.as_object() else {
            *protocol_error = true;
            return Some(invalid_request(Id::Null, "Message is not a JSON object"));
        };

        if let Some(method) = object.get("method") {
            let id = match object.get("id") {
                None => None,
                Some(id) => match Id::from_json(id) {
                    Some(id) => Some(id),
                    None => {
                        *protocol_error = true;
                        return Some(invalid_request(Id::Null, "Request id is not a string or integer"));
                    }
                },
            };

            let version_ok = object
                .get("jsonrpc")
                .is_some_and(|version| serde_json::from_value::<TwoPointZero>(version.clone()).is_ok());
            let method = match (version_ok, method.as_str()) {
                (true, Some(method)) => method,
                (false, _) => {
                    *protocol_error = true;
                    return Some(invalid_request(id.unwrap_or(Id::Null), "Missing or unsupported 'jsonrpc' version"));
                }
                (true, None) => {
                    *protocol_error = true;
                    return Some(invalid_request(id.unwrap_or(Id::Null), "Method name must be a string"));
                }
            };

            let call = MethodCall {
                id: id.as_ref(),
                method,
                params: object.get("params"),
                connection,
            };
            let result = self.invoke(&call);

            match id {
                Some(id) => Some(Response::new(id, result.into())),
                None => {
                    if let Err(details) = result {
                        tracing::debug!(method, error = ?details, "Notification handler failed; nothing to reply to");
                    }
                    None
                }
            }
        } else if object.contains_key("result") || object.contains_key("error") {
            let correlation = on_response(message);
            tracing::trace!(?correlation, "Response handed to the correlator");
            None
        } else {
            *protocol_error = true;
            let id = Id::of_message(message).unwrap_or(Id::Null);
            Some(invalid_request(id, "Message is neither a request nor a response"))
        }
    }

    /// Run the handler for a call, turning a panic into an internal error reply.
    fn invoke(&self, call: &MethodCall<'_, T>) -> MethodResult {
        let handler = self.methods.get(call.method()).unwrap_or(&self.fallback);
        match std::panic::catch_unwind(AssertUnwindSafe(|| handler(call))) {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_err_to_string(panic);
                tracing::error!(method = call.method(), panic = %message, "Method handler panicked");
                Err(ErrorDetails::internal_error(
                    format!("Method '{}' failed unexpectedly", call.method()),
                    None,
                ))
            }
        }
    }
}

impl<T: 'static> Default for MethodTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for MethodTable<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodTable")
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl<T: 'static> Dispatch<T> for MethodTable<T> {
    fn dispatch(&self, envelope: &InboundEnvelope<'_, T>, on_response: &mut OnResponse<'_>) -> Dispatched {
        let message: JsonValue = match serde_json::from_slice(envelope.data()) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(err = %e, len = envelope.len(), "Error parsing JSON message from peer");
                let reply = Response::error_detail(Id::Null, ErrorDetails::parse_error("Parse error", None));
                return Dispatched {
                    reply: serialize_reply(&reply),
                    protocol_error: true,
                };
            }
        };

        let mut protocol_error = false;
        let reply = match &message {
            JsonValue::Array(batch) if batch.is_empty() => {
                protocol_error = true;
                serialize_reply(&invalid_request(Id::Null, "Empty batch"))
            }
            JsonValue::Array(batch) => {
                let replies: Vec<Response> = batch
                    .iter()
                    .filter_map(|message| {
                        self.dispatch_one(message, envelope.connection(), on_response, &mut protocol_error)
                    })
                    .collect();
                if replies.is_empty() {
                    None
                } else {
                    serialize_reply(&replies)
                }
            }
            single => self
                .dispatch_one(single, envelope.connection(), on_response, &mut protocol_error)
                .and_then(|reply| serialize_reply(&reply)),
        };

        Dispatched { reply, protocol_error }
    }
}

fn invalid_request(id: Id, reason: &str) -> Response {
    Response::error_detail(id, ErrorDetails::invalid_request("Invalid request", JsonValue::from(reason)))
}

fn serialize_reply<R: serde::Serialize>(reply: &R) -> Option<String> {
    match serde_json::to_string(reply) {
        Ok(reply) => Some(reply),
        Err(e) => {
            tracing::error!(err = %e, "Failed to serialize reply to JSON; no reply will be sent");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlator::Correlation;
    use crate::types::ErrorCode;
    use serde_json::json;

    struct TestConnection {
        name: &'static str,
    }

    fn table() -> MethodTable<TestConnection> {
        MethodTable::<TestConnection>::new()
            .with_method("echo", |call| Ok(call.raw_params().cloned().unwrap_or_default()))
            .with_method("whoami", |call| Ok(json!(call.connection().name)))
            .with_method("add", |call| {
                let (a, b): (i64, i64) = call.params()?;
                Ok(json!(a + b))
            })
            .with_method("explode", |_call| panic!("boom"))
    }

    /// Dispatch a message and return the parsed reply plus the responses seen by the correlator
    fn dispatch(table: &MethodTable<TestConnection>, message: &str) -> (Option<JsonValue>, bool, Vec<JsonValue>) {
        let connection = TestConnection { name: "pt-1" };
        let envelope = InboundEnvelope::new(message.as_bytes(), &connection);
        let mut responses = Vec::new();
        let dispatched = table.dispatch(&envelope, &mut |response: &JsonValue| {
            responses.push(response.clone());
            Correlation::Unmatched { id: None }
        });
        let reply = dispatched.reply.map(|reply| serde_json::from_str(&reply).unwrap());
        (reply, dispatched.protocol_error, responses)
    }

    #[test]
    fn test_method_call_reply() {
        let table = table();
        let (reply, protocol_error, responses) =
            dispatch(&table, r#"{"jsonrpc":"2.0","method":"echo","params":{"a":1},"id":"r1"}"#);
        assert!(!protocol_error);
        assert!(responses.is_empty());
        assert_eq!(reply.unwrap(), json!({"jsonrpc": "2.0", "result": {"a": 1}, "id": "r1"}));

        let (reply, _, _) = dispatch(&table, r#"{"jsonrpc":"2.0","method":"whoami","id":3}"#);
        assert_eq!(reply.unwrap(), json!({"jsonrpc": "2.0", "result": "pt-1", "id": 3}));
    }

    #[test]
    fn test_negative_and_zero_ids_are_valid() {
        let table = table();
        let (reply, protocol_error, _) = dispatch(&table, r#"{"jsonrpc":"2.0","method":"whoami","id":-5}"#);
        assert!(!protocol_error);
        assert_eq!(reply.unwrap(), json!({"jsonrpc": "2.0", "result": "pt-1", "id": -5}));

        let (reply, protocol_error, _) = dispatch(&table, r#"{"jsonrpc":"2.0","method":"whoami","id":0}"#);
        assert!(!protocol_error);
        assert_eq!(reply.unwrap()["id"], json!(0));

        // Fractional ids are still refused
        let (reply, protocol_error, _) = dispatch(&table, r#"{"jsonrpc":"2.0","method":"whoami","id":1.5}"#);
        assert!(protocol_error);
        assert_eq!(reply.unwrap()["error"]["code"], json!(ErrorCode::InvalidRequest.code()));
    }

    #[test]
    fn test_invalid_params_and_unknown_method() {
        let table = table();
        let (reply, protocol_error, _) =
            dispatch(&table, r#"{"jsonrpc":"2.0","method":"add","params":{"a":1},"id":"p"}"#);
        assert!(!protocol_error);
        let reply = reply.unwrap();
        assert_eq!(reply["error"]["code"], json!(ErrorCode::InvalidParams.code()));
        assert_eq!(reply["id"], json!("p"));

        let (reply, protocol_error, _) =
            dispatch(&table, r#"{"jsonrpc":"2.0","method":"nope","params":{},"id":"m"}"#);
        assert!(!protocol_error);
        assert_eq!(reply.unwrap()["error"]["code"], json!(ErrorCode::MethodNotFound.code()));
    }

    #[test]
    fn test_notifications_never_reply() {
        let table = table();
        let (reply, protocol_error, _) = dispatch(&table, r#"{"jsonrpc":"2.0","method":"echo","params":[1]}"#);
        assert!(reply.is_none());
        assert!(!protocol_error);

        let (reply, _, _) = dispatch(&table, r#"{"jsonrpc":"2.0","method":"nope"}"#);
        assert!(reply.is_none());
    }

    #[test]
    fn test_responses_go_to_the_correlator() {
        let table = table();
        let (reply, protocol_error, responses) = dispatch(&table, r#"{"jsonrpc":"2.0","id":"1","result":{}}"#);
        assert!(reply.is_none());
        assert!(!protocol_error);
        assert_eq!(responses, vec![json!({"jsonrpc": "2.0", "id": "1", "result": {}})]);

        let (_, _, responses) =
            dispatch(&table, r#"{"jsonrpc":"2.0","id":"2","error":{"code":-30000,"message":"x"}}"#);
        assert_eq!(responses.len(), 1);
    }

    #[test]
    fn test_parse_error_is_a_protocol_error() {
        let table = table();
        let (reply, protocol_error, responses) = dispatch(&table, "{not json");
        assert!(protocol_error);
        assert!(responses.is_empty());
        let reply = reply.unwrap();
        assert_eq!(reply["error"]["code"], json!(ErrorCode::ParseError.code()));
        assert_eq!(reply["id"], JsonValue::Null);
    }

    #[test]
    fn test_invalid_requests_are_protocol_errors() {
        let table = table();
        for message in [
            r#"{"jsonrpc":"2.0","id":"x"}"#,
            r#"{"jsonrpc":"1.0","method":"echo","id":"x"}"#,
            r#"{"jsonrpc":"2.0","method":42,"id":"x"}"#,
            r#"{"jsonrpc":"2.0","method":"echo","id":{"nested":true}}"#,
            r#""just a string""#,
            "[]",
        ] {
            let (reply, protocol_error, _) = dispatch(&table, message);
            assert!(protocol_error, "{message} should be a protocol error");
            assert_eq!(
                reply.unwrap()["error"]["code"],
                json!(ErrorCode::InvalidRequest.code()),
                "{message}"
            );
        }

        // The id is echoed back when it is usable
        let (reply, _, _) = dispatch(&table, r#"{"jsonrpc":"1.0","method":"echo","id":"x"}"#);
        assert_eq!(reply.unwrap()["id"], json!("x"));
    }

    #[test]
    fn test_batch_mixes_calls_notifications_and_responses() {
        let table = table();
        let (reply, protocol_error, responses) = dispatch(
            &table,
            concat!(
                r#"[{"jsonrpc":"2.0","method":"echo","params":"a","id":1},"#,
                r#"{"jsonrpc":"2.0","method":"echo","params":"b"},"#,
                r#"{"jsonrpc":"2.0","id":"resp","result":true},"#,
                r#"{"jsonrpc":"2.0","method":"add","params":[2,3],"id":2}]"#
            ),
        );
        assert!(!protocol_error);
        assert_eq!(responses.len(), 1);
        assert_eq!(
            reply.unwrap(),
            json!([
                {"jsonrpc": "2.0", "result": "a", "id": 1},
                {"jsonrpc": "2.0", "result": 5, "id": 2}
            ])
        );

        // A batch of nothing but responses produces no reply at all
        let (reply, _, responses) = dispatch(
            &table,
            r#"[{"jsonrpc":"2.0","id":"a","result":1},{"jsonrpc":"2.0","id":"b","result":2}]"#,
        );
        assert!(reply.is_none());
        assert_eq!(responses.len(), 2);
    }

    #[test]
    fn test_panicking_handler_becomes_internal_error() {
        let table = table();
        let (reply, protocol_error, _) = dispatch(&table, r#"{"jsonrpc":"2.0","method":"explode","id":"e"}"#);
        assert!(!protocol_error);
        let reply = reply.unwrap();
        assert_eq!(reply["error"]["code"], json!(ErrorCode::InternalError.code()));
        assert_eq!(reply["id"], json!("e"));
    }

    #[test]
    fn test_custom_fallback() {
        let mut table = table();
        table.register_fallback(|call| Ok(json!({"fallback": call.method()})));
        assert!(table.contains("echo"));
        assert!(!table.contains("other"));

        let (reply, _, _) = dispatch(&table, r#"{"jsonrpc":"2.0","method":"other","id":"f"}"#);
        assert_eq!(reply.unwrap()["result"], json!({"fallback": "other"}));
    }
}
