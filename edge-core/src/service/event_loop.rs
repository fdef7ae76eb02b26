//! The event loop that services one connection.
//!
//! The loop owns the connection's [`RpcEngine`] and transport outright.  Nothing else can touch
//! the engine: connection handles talk to the loop over the command channel, and the loop applies
//! their commands one at a time between inbound messages.
use std::panic::AssertUnwindSafe;
use std::pin::Pin;

use edge_rpc::{Id, JsonValue, RequestContext, ResponseHandler, RpcEngine, base_request, panic_err_to_string};
use futures::FutureExt;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::connection::{Connection, ControlFrame};
use crate::transport::BoxedTransport;
use crate::{EdgeCoreError, Result, ServerConfig};

/// The running event loop as seen by connection handles.
///
/// Boxed and [`futures::future::Shared`] so every handle can await the end of the loop.  The
/// error is flattened to a string because the output of a shared future has to be `Clone`.
pub(super) type EventLoopFuture = futures::future::Shared<Pin<Box<dyn Future<Output = Result<(), String>> + Send>>>;

/// The engine type of a serviced connection
pub(super) type ConnectionEngine = RpcEngine<Connection, CallContext>;

/// Instructions sent to the event loop by connection handles.
#[derive(Debug)]
pub(super) enum Command {
    /// Send a request and register it.  `sent_tx` learns the assigned id once the request is on
    /// the wire; `response_tx` eventually gets the outcome.
    Call {
        method: String,
        params: Option<JsonValue>,
        sent_tx: oneshot::Sender<Result<Id>>,
        response_tx: oneshot::Sender<Result<JsonValue>>,
    },
    /// Stop waiting for a response.  Replies whether the request was still pending.
    Cancel { id: Id, done_tx: oneshot::Sender<bool> },
    /// Report how many requests are awaiting a response
    PendingRequests { reply_tx: oneshot::Sender<usize> },
}

/// The context each outstanding call carries through the engine: where to deliver its outcome.
#[derive(Debug)]
pub(super) struct CallContext {
    method: String,
    response_tx: Option<oneshot::Sender<Result<JsonValue>>>,
}

impl CallContext {
    fn new(method: String, response_tx: oneshot::Sender<Result<JsonValue>>) -> Self {
        Self {
            method,
            response_tx: Some(response_tx),
        }
    }

    fn complete(&mut self, result: Result<JsonValue>) {
        if let Some(response_tx) = self.response_tx.take() {
            if response_tx.send(result).is_err() {
                tracing::debug!(method = %self.method, "Caller stopped waiting for the response");
            }
        }
    }

    /// Release function: a context released without having been completed belongs to a request
    /// that will never be answered.
    fn abandon(mut self) {
        if self.response_tx.is_some() {
            let method = self.method.clone();
            self.complete(Err(EdgeCoreError::RequestAbandoned { method }));
        }
    }

    fn response_handler() -> ResponseHandler<CallContext> {
        ResponseHandler::new(
            |response, context: &mut CallContext| {
                let result = response.get("result").cloned().unwrap_or_default();
                context.complete(Ok(result));
            },
            |response, context: &mut CallContext| {
                let error = EdgeCoreError::call_failed(context.method.clone(), response);
                context.complete(Err(error));
            },
        )
    }
}

pub(super) struct EventLoop {
    config: ServerConfig,
    connection: Connection,
    engine: ConnectionEngine,
    transport: Box<dyn BoxedTransport>,
    commands: mpsc::Receiver<Command>,
    cancellation_token: CancellationToken,
}

impl EventLoop {
    pub(super) fn new(
        config: ServerConfig,
        connection: Connection,
        engine: ConnectionEngine,
        transport: Box<dyn BoxedTransport>,
        commands: mpsc::Receiver<Command>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            connection,
            engine,
            transport,
            commands,
            cancellation_token,
        }
    }

    /// Run the loop to completion, catching panics so handles always learn how it ended.
    pub(super) fn into_future(self) -> EventLoopFuture {
        let span = tracing::debug_span!("connection",
            connection_id = %self.connection.id(),
            remote_peer = %self.connection.remote_peer());

        async move {
            match AssertUnwindSafe(self.run()).catch_unwind().await {
                Ok(Ok(())) => Ok(()),
                // Already logged by the loop
                Ok(Err(e)) => Err(e.to_string()),
                Err(panic) => {
                    let message = panic_err_to_string(panic);
                    tracing::error!(panic = %message, "Connection event loop panicked");
                    Err(message)
                }
            }
        }
        .instrument(span)
        .boxed()
        .shared()
    }

    async fn run(mut self) -> Result<()> {
        self.connection.process_control_frame(ControlFrame::Start)?;
        self.connection.process_control_frame(ControlFrame::Ready)?;
        tracing::debug!("Connection is ready; event loop is starting");

        let result = self.event_loop().await;
        match &result {
            Ok(()) => {}
            Err(EdgeCoreError::Cancelled) => tracing::debug!("Event loop cancelled"),
            Err(e) => tracing::error!(err = %e, "Event loop terminated due to an error"),
        }

        self.shutdown().await;

        match result {
            Err(EdgeCoreError::Cancelled) => Ok(()),
            other => other,
        }
    }

    async fn event_loop(&mut self) -> Result<()> {
        let mut handles_gone = false;

        loop {
            tokio::select! {
                command = self.commands.recv(), if !handles_gone => {
                    match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            // Nobody can make calls any more, but the peer can still call us
                            tracing::debug!("All connection handles dropped");
                            handles_gone = true;
                        }
                    }
                },
                message = self.transport.boxed_receive_message() => {
                    match message {
                        Ok(Some(message)) => self.handle_inbound_message(message).await?,
                        Ok(None) => {
                            tracing::debug!("Peer closed connection; event loop terminating");
                            break Ok(());
                        }
                        Err(e) => {
                            tracing::error!(err = %e, "Error receiving message from peer");
                            break Err(e);
                        }
                    }
                },
                _ = self.cancellation_token.cancelled() => {
                    tracing::info!("Cancellation signal received, shutting down connection");
                    break Err(EdgeCoreError::Cancelled);
                }
            }
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Call {
                method,
                params,
                sent_tx,
                response_tx,
            } => {
                let result = self.send_request(method, params, response_tx).await;
                let _ = sent_tx.send(result);
            }
            Command::Cancel { id, done_tx } => {
                let _ = done_tx.send(self.engine.cancel(&id));
            }
            Command::PendingRequests { reply_tx } => {
                let _ = reply_tx.send(self.engine.pending_requests());
            }
        }
    }

    /// Build, send and register one request.
    ///
    /// On any failure the request's context is released, which tells the waiting caller the
    /// request was abandoned.
    async fn send_request(
        &mut self,
        method: String,
        params: Option<JsonValue>,
        response_tx: oneshot::Sender<Result<JsonValue>>,
    ) -> Result<Id> {
        let payload = base_request(method.clone(), params);
        let context = RequestContext::new(CallContext::new(method.clone(), response_tx), CallContext::abandon);

        let built = self
            .engine
            .build_request(payload, CallContext::response_handler(), context)
            .map_err(|source| EdgeCoreError::Build { source })?;

        self.transport.boxed_send_message(built.data).await?;

        tracing::debug!(request_id = %built.id, %method, "Sent request");
        self.engine.add_to_registry(built.entry);
        Ok(built.id)
    }

    async fn handle_inbound_message(&mut self, message: String) -> Result<()> {
        tracing::trace!(len = message.len(), "Received message");

        let mut replies = Vec::new();
        let protocol_error = self
            .engine
            .handle_message(message.as_bytes(), &self.connection, |_connection, reply| {
                replies.push(String::from_utf8_lossy(reply).into_owned());
            });

        for reply in replies {
            self.transport.boxed_send_message(reply).await?;
        }

        if protocol_error && self.config.close_on_protocol_error {
            tracing::warn!("Closing connection after a malformed message");
            return Err(EdgeCoreError::ProtocolError);
        }
        Ok(())
    }

    /// Bring everything still in flight to a conclusion after the loop has exited.
    async fn shutdown(&mut self) {
        // No more commands can be queued; the ones already queued are refused
        self.commands.close();
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Call { method, sent_tx, .. } => {
                    tracing::debug!(%method, "Refusing call due to shutdown");
                    let _ = sent_tx.send(Err(EdgeCoreError::ConnectionClosed));
                }
                Command::Cancel { done_tx, .. } => {
                    let _ = done_tx.send(false);
                }
                Command::PendingRequests { reply_tx } => {
                    let _ = reply_tx.send(self.engine.pending_requests());
                }
            }
        }

        if let Err(e) = self.connection.process_control_frame(ControlFrame::Stop) {
            tracing::warn!(err = %e, "Failed to stop connection");
        }

        // Every caller still waiting learns its request was abandoned
        self.engine.drain_all();

        if !self.cancellation_token.is_cancelled() {
            self.cancellation_token.cancel();
        }
    }
}
