//! Publish generation counter

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic count of completed publishes of one image collection.
///
/// The sender advances it while holding the exchange write lock; receivers
/// load it while holding the read lock, so the generation a receiver records
/// names exactly the publish its snapshot came from.
#[derive(Debug)]
pub struct PublishGeneration {
    counter: AtomicU64,
}

impl PublishGeneration {
    /// Start at generation 0 (nothing published yet)
    pub fn new() -> Self {
        Self {
            counter: AtomicU64::new(0),
        }
    }

    /// Current generation with acquire ordering
    pub fn load(&self) -> u64 {
        self.counter.load(Ordering::Acquire)
    }

    /// Complete a publish; returns the new generation
    pub fn advance(&self) -> u64 {
        self.counter.fetch_add(1, Ordering::AcqRel) + 1
    }
}

impl Default for PublishGeneration {
    fn default() -> Self {
        Self::new()
    }
}
