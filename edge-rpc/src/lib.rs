//! Request/response correlation for JSON-RPC 2.0 connections to protocol-translator clients.
//!
//! An [`RpcEngine`] belongs to one connection.  It builds outgoing requests, remembers them until
//! the peer answers, and runs exactly one of each request's two callbacks when the answer shows
//! up.  Inbound requests from the peer are answered by a [`MethodTable`] (or any other
//! [`Dispatch`] implementation).
//!
//! The engine does no I/O of its own: bytes come in through [`RpcEngine::handle_message`] and
//! replies go out through the write function passed to it.  The `edge-core` crate puts an engine
//! behind a tokio task and a line-delimited transport.

mod clock;
mod context;
mod correlator;
mod dispatch;
mod engine;
mod error;
mod handler;
mod ids;
mod method;
mod registry;
#[cfg(test)]
pub mod testing;
mod types;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use context::{ReleaseFn, RequestContext};
pub use correlator::Correlation;
pub use dispatch::{Dispatch, Dispatched, InboundEnvelope, OnResponse};
pub use engine::{BuiltRequest, EngineBuilder, EngineConfig, RpcEngine};
pub use error::{Result, RpcError, panic_err_to_string};
pub use handler::{Outcome, ResponseCallback, ResponseHandler};
pub use ids::{IdGenerator, SequentialIdGenerator, UuidIdGenerator};
pub use method::{MethodCall, MethodResult, MethodTable};
pub use registry::{MessageRegistry, PendingRequest};
pub use types::{
    ErrorCode, ErrorDetails, ErrorResponse, ID_FIELD, Id, JsonValue, Response, ResponsePayload, SuccessResponse,
    TwoPointZero, base_request, to_canonical_string,
};
