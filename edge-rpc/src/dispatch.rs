//! The boundary between the engine and whatever decodes inbound messages and invokes methods.
//!
//! The engine itself never interprets inbound bytes.  It wraps them in an [`InboundEnvelope`] and
//! hands them to a [`Dispatch`] implementation, which calls back into the engine's correlator for
//! anything that looks like a response.  [`crate::MethodTable`] is the stock implementation.
use std::sync::Arc;

use crate::correlator::Correlation;
use crate::types::JsonValue;

/// Raw bytes received on a connection, together with the connection they came from.
///
/// Only lives for the duration of one [`crate::RpcEngine::handle_message`] call.
#[derive(Debug)]
pub struct InboundEnvelope<'a, T> {
    data: &'a [u8],
    connection: &'a T,
}

impl<'a, T> InboundEnvelope<'a, T> {
    pub fn new(data: &'a [u8], connection: &'a T) -> Self {
        Self { data, connection }
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn connection(&self) -> &'a T {
        self.connection
    }
}

/// Result of dispatching one inbound message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Dispatched {
    /// Serialized reply to write back to the sender, if the message called for one
    pub reply: Option<String>,
    /// The message was malformed; the connection layer decides what to do about that
    pub protocol_error: bool,
}

impl Dispatched {
    pub fn reply(reply: String) -> Self {
        Self {
            reply: Some(reply),
            protocol_error: false,
        }
    }

    pub fn nothing() -> Self {
        Self::default()
    }
}

/// Callback through which a dispatcher hands response-shaped messages to the correlator.
pub type OnResponse<'a> = dyn FnMut(&JsonValue) -> Correlation + 'a;

/// Decodes inbound messages, invokes methods, and routes responses back to the correlator.
///
/// `T` is the connection type the envelope carries, so method implementations can tell which
/// connection a call arrived on.
pub trait Dispatch<T>: Send + Sync + 'static {
    fn dispatch(&self, envelope: &InboundEnvelope<'_, T>, on_response: &mut OnResponse<'_>) -> Dispatched;
}

impl<T, D: Dispatch<T> + ?Sized> Dispatch<T> for Arc<D> {
    fn dispatch(&self, envelope: &InboundEnvelope<'_, T>, on_response: &mut OnResponse<'_>) -> Dispatched {
        (**self).dispatch(envelope, on_response)
    }
}
