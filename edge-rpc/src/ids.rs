//! Request identifier generation.
//!
//! The engine doesn't care what identifiers look like as long as no two requests pending at the
//! same time share one.  The generator is bound once when the engine is built.
use std::sync::atomic::{AtomicU64, Ordering};

use uuid::Uuid;

/// Source of unique request identifiers.
///
/// Any `Fn() -> String` closure is a generator, so a custom scheme can be plugged in without
/// declaring a type.  Engines hold their generator as an `Arc<dyn IdGenerator>`, so one generator
/// can be shared by every connection.
pub trait IdGenerator: Send + Sync + 'static {
    /// Produce an identifier not currently used by any pending request.
    fn next_id(&self) -> String;
}

impl<F> IdGenerator for F
where
    F: Fn() -> String + Send + Sync + 'static,
{
    fn next_id(&self) -> String {
        self()
    }
}

/// Default generator: time-ordered UUIDv7 strings.
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn next_id(&self) -> String {
        Uuid::now_v7().to_string()
    }
}

/// Decimal counter ids (`"1"`, `"2"`, ...), handy when wire captures need to be reproducible.
#[derive(Debug)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl SequentialIdGenerator {
    /// Start counting at 1.
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl Default for SequentialIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> String {
        self.next.fetch_add(1, Ordering::Relaxed).to_string()
    }
}
