//! Cooperative cancellation token.
//!
//! Passed explicitly into every long-running operation (inserts,
//! iteration, snapshots, compaction) rather than modeled as a
//! thread-local or via unwinding, matching the teacher's preference for
//! explicit atomics over implicit control flow elsewhere (`memory`,
//! `wal`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{FrostError, Result};

#[derive(Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)) }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Check this token, returning `Err(FrostError::Cancelled)` if set.
    /// Call at every I/O boundary and major loop iteration.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(FrostError::Cancelled)
        } else {
            Ok(())
        }
    }
}
