use thiserror::Error;

pub type Result<T, E = RpcError> = std::result::Result<T, E>;

/// Failures constructing an outgoing request.
///
/// Both variants mean no pending entry was created; the distinction only matters for logging.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Invalid request payload: {reason}")]
    InvalidPayload { reason: &'static str },

    #[error("Error serializing request {request_id} to JSON")]
    SerRequest {
        source: serde_json::Error,
        request_id: String,
    },
}

/// Render the payload of a caught panic as something loggable.
pub fn panic_err_to_string(err: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = err.downcast_ref::<&'static str>() {
        s.to_string()
    } else if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}
