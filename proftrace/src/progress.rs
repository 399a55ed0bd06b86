//! Shared progress reporting and cooperative cancellation.

use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

use crate::{Result, TraceError};

/// Clonable handle to a shared progress cell in `[0, 100]`.
///
/// Decode and encode publish a monotonically increasing value at defined
/// checkpoints. Any holder of a clone may request cancellation by
/// storing a negative value; the next checkpoint observes it and aborts
/// the whole operation with [`TraceError::Cancelled`]. There is no
/// partial-result contract: a cancelled call produces nothing.
#[derive(Clone, Debug, Default)]
pub struct Progress {
    cell: Arc<AtomicI32>,
}

impl Progress {
    pub fn new() -> Self {
        Progress {
            cell: Arc::new(AtomicI32::new(0)),
        }
    }

    /// Publishes a new value, honoring a pending cancellation request.
    pub fn checkpoint(&self, value: i32) -> Result<()> {
        let previous = self.cell.swap(value, Ordering::Release);
        if previous < 0 {
            return Err(TraceError::Cancelled);
        }
        Ok(())
    }

    /// Publishes a new value without checking for cancellation. Used
    /// between worker joins where aborting would leave threads running.
    pub fn store(&self, value: i32) {
        self.cell.store(value, Ordering::Release);
    }

    /// Requests cooperative cancellation of the running operation.
    pub fn cancel(&self) {
        self.cell.store(-1, Ordering::Release);
    }

    pub fn value(&self) -> i32 {
        self.cell.load(Ordering::Acquire)
    }
}
