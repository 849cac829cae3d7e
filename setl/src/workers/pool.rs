//! Node-wide worker pool shared by all stages.
//!
//! The pool bounds how much stage work runs concurrently on the node. Stages
//! acquire a [`WorkerSlot`] per unit of work; the management surface reports
//! the pool's size and utilization and can resize it at runtime.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;

use crate::error::{ErrorKind, NodeResult};
use crate::node_error;

/// Resizable pool of worker slots.
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: AtomicUsize,
    active: Arc<AtomicUsize>,
}

/// One acquired worker slot.
///
/// The slot is returned to the pool when dropped.
pub struct WorkerSlot {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

impl WorkerPool {
    /// Creates a pool with the given number of slots.
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size: AtomicUsize::new(size),
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Acquires a worker slot, waiting until one is available.
    pub async fn acquire(&self) -> NodeResult<WorkerSlot> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| node_error!(ErrorKind::WorkerPoolClosed, "Worker pool was closed"))?;

        self.active.fetch_add(1, Ordering::AcqRel);
        Ok(WorkerSlot {
            _permit: permit,
            active: Arc::clone(&self.active),
        })
    }

    /// Acquires a worker slot without waiting, or returns `None` when the pool
    /// is exhausted.
    pub fn try_acquire(&self) -> Option<WorkerSlot> {
        let permit = Arc::clone(&self.permits).try_acquire_owned().ok()?;

        self.active.fetch_add(1, Ordering::AcqRel);
        Some(WorkerSlot {
            _permit: permit,
            active: Arc::clone(&self.active),
        })
    }

    /// Returns the number of slots currently held.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Returns the configured pool size.
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Resizes the pool.
    ///
    /// Growing takes effect immediately. Shrinking removes only slots that are
    /// currently idle; slots already held drain naturally as they are dropped,
    /// so utilization may briefly exceed the new size.
    pub fn resize(&self, new_size: usize) {
        let old_size = self.size.swap(new_size, Ordering::AcqRel);

        if new_size > old_size {
            self.permits.add_permits(new_size - old_size);
        } else if new_size < old_size {
            let requested = old_size - new_size;
            let forgotten = self.permits.forget_permits(requested);
            if forgotten < requested {
                debug!(
                    requested,
                    forgotten, "pool shrink partially deferred until held slots drain"
                );
            }
        }
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size())
            .field("active", &self.active())
            .finish()
    }
}
