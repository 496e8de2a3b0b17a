use std::{any::Any, fmt, future::Future};

use nese_resources::AllocationId;
use tracing::trace;

use crate::{AllocationStore, Result};

/// Guard for the exclusive lock of one allocation.
///
/// The lock is released when the guard is dropped.
pub struct AllocationLock {
    allocation_id: AllocationId,
    _guard: Box<dyn Any + Send + Sync>,
}

impl AllocationLock {
    /// Wrap the store-specific guard that keeps the allocation locked.
    pub fn new(allocation_id: AllocationId, guard: impl Any + Send + Sync) -> Self {
        Self {
            allocation_id,
            _guard: Box::new(guard),
        }
    }

    pub fn allocation_id(&self) -> AllocationId {
        self.allocation_id
    }
}

impl fmt::Debug for AllocationLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AllocationLock")
            .field("allocation_id", &self.allocation_id)
            .finish_non_exhaustive()
    }
}

/// Run `step` while holding the lock of the allocation.
///
/// The lock is released on every exit path of the step, including when the
/// returned future is dropped before completion. Steps for different
/// allocations never contend.
pub async fn with_allocation_lock<F, T>(
    store: &dyn AllocationStore,
    allocation_id: AllocationId,
    step: F,
) -> Result<T>
where
    F: Future<Output = T>,
{
    let lock = store.lock_allocation(allocation_id).await?;
    trace!(allocation = %allocation_id, "Allocation lock acquired");

    let output = step.await;

    drop(lock);
    trace!(allocation = %allocation_id, "Allocation lock released");

    Ok(output)
}
