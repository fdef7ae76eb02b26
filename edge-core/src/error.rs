use edge_rpc::{ErrorDetails, JsonValue, RpcError};
use thiserror::Error;

use crate::connection::{ConnectionState, ControlFrame};
use crate::pt_api::PtApiError;

pub type Result<T, E = EdgeCoreError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum EdgeCoreError {
    #[error("Transport error: {source}")]
    Transport {
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("Control frame {frame} is not valid in connection state {state}")]
    InvalidTransition {
        frame: ControlFrame,
        state: ConnectionState,
    },

    #[error("The connection is closed")]
    ConnectionClosed,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Request for method '{method}' was abandoned before a response arrived")]
    RequestAbandoned { method: String },

    #[error("Failed to build request")]
    Build { source: RpcError },

    #[error("Call to method '{method}' failed{}",
        .error.as_ref().map(|e| format!(": {} ({})", e.message, e.code.code())).unwrap_or_default()
    )]
    CallFailed {
        method: String,
        /// The complete error response
        response: JsonValue,
        /// The `error` object of the response, if it was well-formed
        error: Option<ErrorDetails>,
        /// The PT API error the response's code stands for, if any
        pt_error: Option<PtApiError>,
    },

    #[error("Connection closed after receiving a malformed message")]
    ProtocolError,

    #[error("Invalid configuration")]
    Config { source: serde_yaml::Error },

    #[error("Error reading configuration file '{path}'")]
    ConfigIo { source: std::io::Error, path: String },

    #[error("BUG: {message}")]
    Bug { message: String },
}

impl EdgeCoreError {
    /// An internal invariant was violated.  Logged as an error where it is constructed.
    pub(crate) fn bug(message: impl Into<String>) -> Self {
        let message = message.into();
        tracing::error!(%message, "BUG");
        EdgeCoreError::Bug { message }
    }

    /// Interpret a failed response to a call of `method`.
    pub(crate) fn call_failed(method: impl Into<String>, response: &JsonValue) -> Self {
        let error = ErrorDetails::of_response(response);
        let pt_error = error.as_ref().and_then(PtApiError::of_error_details);
        EdgeCoreError::CallFailed {
            method: method.into(),
            response: response.clone(),
            error,
            pt_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn test_bug_keeps_message() {
        let err = EdgeCoreError::bug("event loop vanished");
        assert_matches!(&err, EdgeCoreError::Bug { message } if message == "event loop vanished");
        assert_eq!(err.to_string(), "BUG: event loop vanished");
    }

    #[test]
    fn test_call_failed_decodes_pt_error() {
        let response = json!({"jsonrpc": "2.0", "id": "1", "error": {"code": -30103, "message": "Invalid JSON structure"}});
        assert_matches!(
            EdgeCoreError::call_failed("write", &response),
            EdgeCoreError::CallFailed { pt_error: Some(PtApiError::InvalidJsonStructure), error: Some(_), .. }
        );

        let response = json!({"jsonrpc": "2.0", "id": "1", "error": "not an object"});
        assert_matches!(
            EdgeCoreError::call_failed("write", &response),
            EdgeCoreError::CallFailed { pt_error: None, error: None, .. }
        );
    }
}
