use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared byte counter for progress display.
///
/// Counts post-encryption bytes at the socket boundary on both sides, so the
/// two peers' numbers track each other. Compression makes the total only
/// approximately comparable to the preamble's `total_size`; display code
/// should treat the percentage as a rough estimate.
#[derive(Debug, Clone, Default)]
pub struct Progress(Arc<AtomicU64>);

impl Progress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, bytes: u64) {
        self.0.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn bytes(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}
