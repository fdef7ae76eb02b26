//! Helpers for testing the connection service.
//!
//! This module is only compiled when `test` is enabled
use tokio::io::DuplexStream;
use tokio_util::codec::{Framed, LinesCodec};

/// Initialize tracing with a subscriber and some reasonable defaults suitable for enabling log
/// output in tests.
///
/// This is idempotent; it can be called from multiple tests in multiple threads but will only
/// initialize tracing once.
pub fn init_test_logging() {
    use std::sync::OnceLock;

    const DEFAULT_LOG_FILTER: &str = "edge_core=trace,edge_rpc=trace,warn";
    static INIT_LOGGING: OnceLock<()> = OnceLock::new();

    INIT_LOGGING.get_or_init(|| {
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
            .with_test_writer()
            .try_init()
            .unwrap()
    });
}

/// Two ends of an in-memory newline-delimited connection: the first for the server, the second
/// for the test to play the protocol translator.
pub fn setup_test_channel() -> (Framed<DuplexStream, LinesCodec>, Framed<DuplexStream, LinesCodec>) {
    let (server, client) = tokio::io::duplex(64 * 1024);
    (
        Framed::new(server, LinesCodec::new()),
        Framed::new(client, LinesCodec::new()),
    )
}
