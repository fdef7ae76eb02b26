//! A transport is simply a source and sink of serialized JSON-RPC messages.
//!
//! By the time a transport reaches the connection service, the underlying socket, TLS session or
//! pipe has already been established by the caller.  The service only needs to read and write
//! whole messages, which keeps this abstraction deceptively simple.
use std::borrow::Cow;
use std::pin::Pin;

use futures::{FutureExt, Sink, SinkExt, Stream, StreamExt, TryFutureExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};

use crate::{EdgeCoreError, Result};

/// A source and sink of JSON-RPC messages over some underlying transport layer provided by the
/// caller.
///
/// Messages are opaque strings at this level.
pub trait Transport: Send + Sized + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Transport-specific identifier of the remote peer, useful for logging and debugging.
    fn remote_peer(&self) -> Cow<'static, str>;

    /// Send a message, completing once it has been handed to the transport layer.
    fn send_message(&mut self, message: String) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

    /// Receive the next message, or `Ok(None)` once the peer has closed the transport.
    ///
    /// This future must be cancel-safe: the event loop drops it whenever some other event wins
    /// the race, and no message may be lost when that happens.
    fn receive_message(&mut self) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + '_;
}

/// Dyn-compatible wrapper around [`Transport`] so the event loop doesn't need to be generic.
pub(crate) trait BoxedTransport: Send + 'static {
    fn boxed_remote_peer(&self) -> Cow<'static, str>;
    fn boxed_send_message(&mut self, message: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
    fn boxed_receive_message(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + '_>>;
}

impl<T> BoxedTransport for T
where
    T: Transport + 'static,
{
    fn boxed_remote_peer(&self) -> Cow<'static, str> {
        <Self as Transport>::remote_peer(self)
    }

    fn boxed_send_message(&mut self, message: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        <Self as Transport>::send_message(self, message)
            .map_err(|e| EdgeCoreError::Transport { source: Box::new(e) })
            .boxed()
    }

    fn boxed_receive_message(&mut self) -> Pin<Box<dyn Future<Output = Result<Option<String>>> + Send + '_>> {
        <Self as Transport>::receive_message(self)
            .map_err(|e| EdgeCoreError::Transport { source: Box::new(e) })
            .boxed()
    }
}

/// A pair of a message stream and a message sink is a transport.  Mostly useful in tests.
impl<In, InErr, Out> Transport for (In, Out)
where
    In: Stream<Item = Result<String, InErr>> + Unpin + Send + 'static,
    InErr: std::error::Error + Send + Sync + 'static,
    Out: Sink<String> + Unpin + Send + 'static,
    Out::Error: std::error::Error + Send + Sync + 'static,
{
    type Error = EdgeCoreError;

    fn remote_peer(&self) -> Cow<'static, str> {
        format!("({}, {})", std::any::type_name::<In>(), std::any::type_name::<Out>()).into()
    }

    fn send_message(&mut self, message: String) -> impl Future<Output = Result<(), Self::Error>> + Send + '_ {
        self.1
            .send(message)
            .map_err(|e| EdgeCoreError::Transport { source: Box::new(e) })
    }

    fn receive_message(&mut self) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + '_ {
        self.0.next().map(|next: Option<Result<String, InErr>>| {
            next.transpose()
                .map_err(|e| EdgeCoreError::Transport { source: Box::new(e) })
        })
    }
}

/// Newline-delimited UTF-8 messages over anything that is [`AsyncRead`] + [`AsyncWrite`], such as
/// a TCP or Unix socket.
impl<Io> Transport for Framed<Io, LinesCodec>
where
    Io: Send + Unpin + AsyncRead + AsyncWrite + 'static,
{
    type Error = LinesCodecError;

    fn remote_peer(&self) -> Cow<'static, str> {
        Cow::Borrowed(std::any::type_name::<Io>())
    }

    fn send_message(&mut self, message: String) -> impl Future<Output = Result<(), Self::Error>> + Send + '_ {
        self.send(message)
    }

    fn receive_message(&mut self) -> impl Future<Output = Result<Option<String>, Self::Error>> + Send + '_ {
        // `StreamExt::next` only borrows the stream, so dropping it mid-poll loses nothing
        self.next().map(Option::transpose)
    }
}

/// Frame `io` as newline-delimited messages no longer than `max_message_length` bytes.
pub fn line_transport<Io>(io: Io, max_message_length: usize) -> Framed<Io, LinesCodec>
where
    Io: AsyncRead + AsyncWrite,
{
    Framed::new(io, LinesCodec::new_with_max_length(max_message_length))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_line_transport_round_trip() {
        let (a, b) = tokio::io::duplex(1024);
        let mut a = line_transport(a, 64);
        let mut b = line_transport(b, 64);

        a.send_message(r#"{"jsonrpc":"2.0","id":"1","result":{}}"#.to_string())
            .await
            .unwrap();
        assert_eq!(
            b.receive_message().await.unwrap().as_deref(),
            Some(r#"{"jsonrpc":"2.0","id":"1","result":{}}"#)
        );

        drop(a);
        assert_matches!(b.receive_message().await, Ok(None));
    }

    #[tokio::test]
    async fn test_line_transport_rejects_long_lines() {
        let (a, b) = tokio::io::duplex(1024);
        let mut a = line_transport(a, 1024);
        let mut b = line_transport(b, 16);

        a.send_message("x".repeat(100)).await.unwrap();
        assert_matches!(
            b.receive_message().await,
            Err(LinesCodecError::MaxLineLengthExceeded)
        );
    }

    #[tokio::test]
    async fn test_boxed_transport_maps_errors() {
        let (a, b) = tokio::io::duplex(1024);
        let mut a = line_transport(a, 1024);
        let mut b: Box<dyn BoxedTransport> = Box::new(line_transport(b, 16));

        a.send_message("y".repeat(100)).await.unwrap();
        assert_matches!(
            b.boxed_receive_message().await,
            Err(EdgeCoreError::Transport { .. })
        );
        assert!(b.boxed_remote_peer().contains("DuplexStream"));
    }
}
