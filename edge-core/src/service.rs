//! The connection service: spawns one event loop per connection, each owning its own engine.
use std::sync::Arc;

use edge_rpc::{IdGenerator, MethodTable, RpcEngine, UuidIdGenerator};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::connection::Connection;
use crate::transport::{BoxedTransport, Transport, line_transport};
use crate::{EdgeCoreError, Result, ServerConfig};

mod event_loop;
mod handle;

pub use handle::{ConnectionHandle, PendingCall};

#[derive(Default)]
pub struct EdgeServerBuilder {
    config: ServerConfig,
    methods: MethodTable<Connection>,
    id_generator: Option<Arc<dyn IdGenerator>>,
}

impl EdgeServerBuilder {
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Methods the protocol translators may call on us.  Shared by every connection.
    pub fn with_methods(mut self, methods: MethodTable<Connection>) -> Self {
        self.methods = methods;
        self
    }

    /// Generator of the ids of requests we send.  Shared by every connection, so ids are unique
    /// across connections too.
    pub fn with_id_generator(mut self, id_generator: impl IdGenerator) -> Self {
        self.id_generator = Some(Arc::new(id_generator));
        self
    }

    pub fn build(self) -> EdgeServer {
        EdgeServer {
            config: self.config,
            methods: Arc::new(self.methods),
            id_generator: self.id_generator.unwrap_or_else(|| Arc::new(UuidIdGenerator)),
            cancellation_token: CancellationToken::new(),
        }
    }
}

/// Services connections from protocol translators.
pub struct EdgeServer {
    config: ServerConfig,
    methods: Arc<MethodTable<Connection>>,
    id_generator: Arc<dyn IdGenerator>,
    cancellation_token: CancellationToken,
}

impl EdgeServer {
    pub fn builder() -> EdgeServerBuilder {
        EdgeServerBuilder::default()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Start servicing a connection over `transport`, in a new async task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn serve_connection(&self, transport: impl Transport) -> Result<ConnectionHandle> {
        let cancellation_token = self.cancellation_token.child_token();
        if cancellation_token.is_cancelled() {
            tracing::warn!("Server is shutting down; refusing new connection");
            return Err(EdgeCoreError::Cancelled);
        }

        let transport: Box<dyn BoxedTransport> = Box::new(transport);
        let connection = Connection::new(transport.boxed_remote_peer());
        let connection_id = connection.id();

        let engine = RpcEngine::builder()
            .with_config(self.config.engine.clone())
            .with_dispatcher(self.methods.clone())
            .with_shared_id_generator(self.id_generator.clone())
            .build();

        let (command_tx, command_rx) = mpsc::channel(self.config.command_channel_bounds.max(1));

        let event_loop_fut = event_loop::EventLoop::new(
            self.config.clone(),
            connection,
            engine,
            transport,
            command_rx,
            cancellation_token.clone(),
        )
        .into_future();

        tracing::debug!(%connection_id, "Spawning connection event loop");
        tokio::spawn(event_loop_fut.clone());

        Ok(ConnectionHandle::new(
            connection_id,
            command_tx,
            cancellation_token,
            event_loop_fut,
        ))
    }

    /// Service newline-delimited messages over `io`, limited to the configured message length.
    pub fn serve_io<Io>(&self, io: Io) -> Result<ConnectionHandle>
    where
        Io: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        self.serve_connection(line_transport(io, self.config.max_message_length))
    }

    /// Shut down every connection this server is servicing, and refuse new ones.
    ///
    /// Returns immediately; await [`ConnectionHandle::closed`] to know when a connection is done.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down all connections");
        self.cancellation_token.cancel();
    }
}
