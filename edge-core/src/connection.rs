//! A logical connection to one protocol translator, and the control frames that move it through
//! its lifecycle.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use strum::Display;

use crate::{EdgeCoreError, Result};

/// Process-unique identifier of a connection, used to tell connections apart in logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Idle,
    Started,
    Ready,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum ControlFrame {
    Start,
    Ready,
    Stop,
}

/// The connection as seen by method handlers and the event loop.
///
/// Method handlers get a shared reference through [`edge_rpc::MethodCall::connection`]; only the
/// event loop applies control frames.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    remote_peer: String,
    state: ConnectionState,
}

impl Connection {
    pub fn new(remote_peer: impl Into<String>) -> Self {
        Self {
            id: ConnectionId::next(),
            remote_peer: remote_peer.into(),
            state: ConnectionState::Idle,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Transport-specific description of the peer
    pub fn remote_peer(&self) -> &str {
        &self.remote_peer
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// Apply a control frame, returning the new state.
    ///
    /// An invalid transition is an error and leaves the state unchanged.
    pub fn process_control_frame(&mut self, frame: ControlFrame) -> Result<ConnectionState> {
        let next = match (self.state, frame) {
            (ConnectionState::Idle, ControlFrame::Start) => ConnectionState::Started,
            (ConnectionState::Started, ControlFrame::Ready) => ConnectionState::Ready,
            (state, ControlFrame::Stop) if state != ConnectionState::Stopped => ConnectionState::Stopped,
            (state, frame) => {
                tracing::warn!(connection_id = %self.id, %state, %frame, "Rejecting control frame");
                return Err(EdgeCoreError::InvalidTransition { frame, state });
            }
        };

        tracing::debug!(connection_id = %self.id, from = %self.state, to = %next, "Connection state change");
        self.state = next;
        Ok(next)
    }
}
