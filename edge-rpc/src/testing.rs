//! Helpers shared by the unit tests and the integration tests under `tests/`.
//!
//! This module is only compiled when `test` is enabled
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Initialize tracing with a subscriber and some reasonable defaults suitable for enabling log
/// output in tests.
///
/// This is idempotent; it can be called from multiple tests in multiple threads but will only
/// initialize tracing once.
pub fn init_test_logging() {
    use std::sync::OnceLock;

    const DEFAULT_LOG_FILTER: &str = "edge_rpc=trace,warn";
    static INIT_LOGGING: OnceLock<()> = OnceLock::new();

    INIT_LOGGING.get_or_init(|| {
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()))
            .with_test_writer()
            .try_init()
            .unwrap()
    });
}

/// Counts how many times the callbacks and release function of a request ran.
#[derive(Clone, Debug, Default)]
pub struct CallbackCounts {
    pub successes: Arc<AtomicUsize>,
    pub failures: Arc<AtomicUsize>,
    pub releases: Arc<AtomicUsize>,
}

impl CallbackCounts {
    pub fn successes(&self) -> usize {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}
