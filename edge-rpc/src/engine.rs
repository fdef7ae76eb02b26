//! The correlation engine: one instance per connection, holding that connection's pending requests
//! along with the method table, id generator and clock it was built with.
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, MonotonicClock};
use crate::context::RequestContext;
use crate::correlator::{self, Correlation};
use crate::dispatch::{Dispatch, InboundEnvelope};
use crate::error::{Result, RpcError};
use crate::handler::ResponseHandler;
use crate::ids::{IdGenerator, UuidIdGenerator};
use crate::method::MethodTable;
use crate::registry::{MessageRegistry, PendingRequest};
use crate::types::{ID_FIELD, Id, JsonValue, to_canonical_string};

/// Tunables of a single engine.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Response callbacks running longer than this are logged as slow
    #[serde(with = "humantime_serde")]
    pub callback_warn_threshold: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            callback_warn_threshold: Duration::from_millis(500),
        }
    }
}

/// A request that has been assigned an id and serialized, but not yet registered.
///
/// Dropping it instead of passing `entry` to [`RpcEngine::add_to_registry`] discards the request
/// and releases its context.
#[derive(Debug)]
pub struct BuiltRequest<C> {
    pub entry: PendingRequest<C>,
    /// Compact serialized form, object keys sorted, ready to write to the wire
    pub data: String,
    pub id: Id,
}

pub struct EngineBuilder<T, C = ()> {
    config: EngineConfig,
    methods: Box<dyn Dispatch<T>>,
    id_generator: Arc<dyn IdGenerator>,
    clock: Box<dyn Clock>,
    _context: std::marker::PhantomData<fn() -> C>,
}

impl<T: 'static, C> EngineBuilder<T, C> {
    fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            methods: Box::new(MethodTable::<T>::new()),
            id_generator: Arc::new(UuidIdGenerator),
            clock: Box::new(MonotonicClock::new()),
            _context: std::marker::PhantomData,
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Use `methods` to answer inbound requests and notifications.
    pub fn with_methods(self, methods: MethodTable<T>) -> Self {
        self.with_dispatcher(methods)
    }

    /// Replace the stock method table with a custom dispatcher.
    pub fn with_dispatcher(mut self, dispatcher: impl Dispatch<T>) -> Self {
        self.methods = Box::new(dispatcher);
        self
    }

    pub fn with_id_generator(self, id_generator: impl IdGenerator) -> Self {
        self.with_shared_id_generator(Arc::new(id_generator))
    }

    /// Use a generator that is also used elsewhere, typically by the engines of other connections.
    pub fn with_shared_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn build(self) -> RpcEngine<T, C> {
        RpcEngine {
            config: self.config,
            methods: self.methods,
            id_generator: self.id_generator,
            clock: self.clock,
            registry: MessageRegistry::new(),
        }
    }
}

/// Tracks the requests sent over one connection and matches inbound responses to them.
///
/// `T` is the connection type handed to method handlers, `C` the per-request context type.
///
/// Every operation takes `&mut self` and none of them block, so the engine is meant to be owned
/// by whatever single task drives the connection.  It is `Send` and can be moved into that task,
/// but it has no internal locking and is not meant to be shared.
pub struct RpcEngine<T, C = ()> {
    config: EngineConfig,
    methods: Box<dyn Dispatch<T>>,
    id_generator: Arc<dyn IdGenerator>,
    clock: Box<dyn Clock>,
    registry: MessageRegistry<C>,
}

impl<T: 'static, C> RpcEngine<T, C> {
    pub fn builder() -> EngineBuilder<T, C> {
        EngineBuilder::new()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Assign an id to `payload`, serialize it, and package it with its handler and context.
    ///
    /// The result is not registered yet; see [`Self::add_to_registry`].  On error no entry
    /// exists and `context` has already been released.
    pub fn build_request(
        &self,
        mut payload: JsonValue,
        handler: ResponseHandler<C>,
        context: RequestContext<C>,
    ) -> Result<BuiltRequest<C>> {
        let Some(object) = payload.as_object_mut() else {
            let reason = if payload.is_null() {
                "payload is null"
            } else {
                "payload is not a JSON object"
            };
            tracing::warn!(reason, "Refusing to build request");
            return Err(RpcError::InvalidPayload { reason });
        };

        let id = self.id_generator.next_id();
        object.insert(ID_FIELD.to_string(), JsonValue::String(id.clone()));

        let data = match to_canonical_string(&payload) {
            Ok(data) => data,
            Err(source) => {
                tracing::error!(request_id = %id, err = %source, "Failed to serialize request");
                return Err(RpcError::SerRequest {
                    source,
                    request_id: id,
                });
            }
        };

        let id = Id::Str(id);
        tracing::trace!(request_id = %id, len = data.len(), "Built request");

        Ok(BuiltRequest {
            entry: PendingRequest::new(id.clone(), payload, handler, context),
            data,
            id,
        })
    }

    /// Start tracking a request that has been (or is about to be) sent.
    pub fn add_to_registry(&mut self, entry: PendingRequest<C>) {
        tracing::trace!(request_id = %entry.id(), pending = self.registry.len() + 1, "Registering request");
        self.registry.insert(entry);
    }

    /// Match a response to its pending request, run the appropriate callback, and release the
    /// request.
    pub fn handle_response(&mut self, response: &JsonValue) -> Correlation {
        correlator::handle_response(
            &mut self.registry,
            self.clock.as_ref(),
            self.config.callback_warn_threshold,
            response,
        )
    }

    /// Process bytes received on `connection`.
    ///
    /// Requests are answered by the method table, responses are correlated, and any reply is
    /// passed to `write` as-is.  Returns `true` if the message was malformed; what to do about
    /// that is up to the caller.
    pub fn handle_message(&mut self, data: &[u8], connection: &T, mut write: impl FnMut(&T, &[u8])) -> bool {
        // Split the borrows so the correlator can use the registry while the dispatcher runs
        let Self {
            config,
            methods,
            clock,
            registry,
            ..
        } = self;
        let warn_threshold = config.callback_warn_threshold;

        let envelope = InboundEnvelope::new(data, connection);
        let dispatched = methods.dispatch(&envelope, &mut |response: &JsonValue| {
            correlator::handle_response(registry, &**clock, warn_threshold, response)
        });

        if let Some(reply) = &dispatched.reply {
            tracing::trace!(len = reply.len(), "Writing reply");
            write(envelope.connection(), reply.as_bytes());
        }
        if dispatched.protocol_error {
            tracing::debug!(len = envelope.len(), "Inbound message was malformed");
        }

        dispatched.protocol_error
    }

    /// Abandon one pending request without running either of its callbacks.
    ///
    /// Returns `false` if no request with that id was pending.
    pub fn cancel(&mut self, id: &Id) -> bool {
        match self.registry.remove(id) {
            Some(entry) => {
                tracing::debug!(request_id = %id, method = ?entry.method(), "Cancelled pending request");
                true
            }
            None => {
                tracing::debug!(request_id = %id, "No pending request to cancel");
                false
            }
        }
    }

    /// Abandon every pending request without running callbacks, releasing their contexts.
    ///
    /// Returns how many were abandoned.
    pub fn drain_all(&mut self) -> usize {
        let count = self.registry.drain().count();
        if count > 0 {
            tracing::warn!(count, "Discarded pending requests that will never get a response");
        } else {
            tracing::debug!("No pending requests to discard");
        }
        count
    }

    /// Number of requests awaiting a response
    pub fn pending_requests(&self) -> usize {
        self.registry.len()
    }

    pub fn registry(&self) -> &MessageRegistry<C> {
        &self.registry
    }
}

impl<T, C> fmt::Debug for RpcEngine<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcEngine")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
