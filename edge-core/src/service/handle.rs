//! Handle to a connection's event loop, and to the calls made through it.
use edge_rpc::{Id, JsonValue};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::event_loop::{Command, EventLoopFuture};
use crate::connection::ConnectionId;
use crate::{EdgeCoreError, Result};

/// Cheaply-clonable handle to one serviced connection.
///
/// Calls made through the handle are sent to the connection's event loop, which owns the
/// connection's engine; the handle itself holds no request state.
///
/// Obtained from [`crate::EdgeServer::serve_connection`].
#[derive(Clone)]
pub struct ConnectionHandle {
    connection_id: ConnectionId,
    commands: mpsc::Sender<Command>,
    cancellation_token: CancellationToken,
    event_loop_fut: EventLoopFuture,
}

impl ConnectionHandle {
    pub(super) fn new(
        connection_id: ConnectionId,
        commands: mpsc::Sender<Command>,
        cancellation_token: CancellationToken,
        event_loop_fut: EventLoopFuture,
    ) -> Self {
        Self {
            connection_id,
            commands,
            cancellation_token,
            event_loop_fut,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Call `method` on the remote peer and wait for its result.
    ///
    /// If you need the request id or the ability to cancel the call, use [`Self::start_call`]
    /// instead.
    pub async fn call(&self, method: &str, params: impl Into<Option<JsonValue>>) -> Result<JsonValue> {
        self.start_call(method, params).await?.response().await
    }

    /// Send a request to the remote peer without waiting for the response.
    ///
    /// Completes once the request has been written to the transport and registered with the
    /// connection's engine.
    #[instrument(skip_all, fields(connection_id = %self.connection_id, %method))]
    pub async fn start_call(&self, method: &str, params: impl Into<Option<JsonValue>>) -> Result<PendingCall> {
        let (sent_tx, sent_rx) = oneshot::channel();
        let (response_tx, response_rx) = oneshot::channel();

        self.send_command(Command::Call {
            method: method.to_string(),
            params: params.into(),
            sent_tx,
            response_tx,
        })
        .await?;

        // The event loop answers every command, even while shutting down
        let id = sent_rx.await.map_err(|_| EdgeCoreError::bug("event loop dropped a call without answering it"))??;

        Ok(PendingCall {
            id,
            method: method.to_string(),
            receiver: response_rx,
            handle: self.clone(),
        })
    }

    /// Number of requests on this connection still awaiting a response
    pub async fn pending_requests(&self) -> Result<usize> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send_command(Command::PendingRequests { reply_tx }).await?;
        reply_rx.await.map_err(|_| EdgeCoreError::ConnectionClosed)
    }

    /// Abandon a pending request.  Returns whether it was still pending.
    async fn cancel(&self, id: Id) -> Result<bool> {
        let (done_tx, done_rx) = oneshot::channel();
        self.send_command(Command::Cancel { id, done_tx }).await?;
        done_rx.await.map_err(|_| EdgeCoreError::ConnectionClosed)
    }

    async fn send_command(&self, command: Command) -> Result<()> {
        self.commands.send(command).await.map_err(|_| {
            tracing::debug!(
                "Command channel closed; connection is presumably closed or event loop is terminated"
            );
            EdgeCoreError::ConnectionClosed
        })
    }

    /// Signal the event loop to shut down, and wait until it has.
    ///
    /// This affects every handle to the connection.  Requests still pending fail with
    /// [`EdgeCoreError::RequestAbandoned`].
    ///
    /// The result is the result of the event loop itself; either way the loop has stopped.
    pub async fn shutdown(self) -> Result<(), String> {
        self.cancellation_token.cancel();
        self.event_loop_fut.await
    }

    /// Wait for the event loop to stop on its own, for example because the peer disconnected.
    pub async fn closed(&self) -> Result<(), String> {
        self.event_loop_fut.clone().await
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}

/// A request that has been sent and is awaiting its response.
///
/// Dropping this does not cancel the request; the engine keeps tracking it until the response
/// arrives or the connection closes.  Use [`Self::cancel`] for that.
pub struct PendingCall {
    id: Id,
    method: String,
    receiver: oneshot::Receiver<Result<JsonValue>>,
    handle: ConnectionHandle,
}

impl PendingCall {
    /// The id the request was sent with
    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    /// Stop tracking the request.  A response arriving later is ignored, and [`Self::response`]
    /// resolves to [`EdgeCoreError::RequestAbandoned`].
    ///
    /// Returns whether the request was still pending.
    pub async fn cancel(&self) -> Result<bool> {
        tracing::debug!(request_id = %self.id, method = %self.method, "Cancelling call");
        self.handle.cancel(self.id.clone()).await
    }

    /// Wait for the outcome of the call.
    ///
    /// A response with `result` yields that value.  An error response yields
    /// [`EdgeCoreError::CallFailed`].
    pub async fn response(self) -> Result<JsonValue> {
        // The context's release function always answers, so this means the loop died hard
        self.receiver.await.unwrap_or_else(|_| {
            Err(EdgeCoreError::bug(format!(
                "response channel for request {} dropped without an answer",
                self.id
            )))
        })
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("connection_id", &self.connection_id)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCall")
            .field("id", &self.id)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}
