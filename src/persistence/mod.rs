//! Persistence layer: single-file save/load of a complete index.

pub mod format;
pub mod serialization;
pub(crate) mod snapshot;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag for long-running save/load calls.
///
/// Clones share the same flag, so one clone can be handed to another thread
/// and cancelled there. Work checks it after every node record.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
