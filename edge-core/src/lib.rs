//! Connection lifecycle for protocol translators connected to the edge gateway.
//!
//! Each connection is serviced by its own tokio task, which owns that connection's
//! [`edge_rpc::RpcEngine`].  Calls to the protocol translator go through a [`ConnectionHandle`];
//! calls from it are answered by the [`edge_rpc::MethodTable`] the [`EdgeServer`] was built with.

mod config;
mod connection;
mod error;
mod pt_api;
mod service;
#[cfg(test)]
pub mod testing;
mod transport;

pub use config::ServerConfig;
pub use connection::{Connection, ConnectionId, ConnectionState, ControlFrame};
pub use error::{EdgeCoreError, Result};
pub use pt_api::PtApiError;
pub use service::{ConnectionHandle, EdgeServer, EdgeServerBuilder, PendingCall};
pub use transport::{Transport, line_transport};
