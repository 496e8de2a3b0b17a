//! Access to the allocation-management system.
//!
//! The provisioner never owns allocations. It reads configuration from their
//! attributes, writes results back as new attributes, and serializes its own
//! work per allocation through the store's row lock.

mod discovery;
mod error;
mod lock;
mod memory;

use async_trait::async_trait;
use nese_resources::{Allocation, AllocationId, AllocationStatus, AttributeName, AttributeValue};

pub use self::{
    discovery::find_pending_allocations,
    error::{AllocationStoreError, Result},
    lock::{AllocationLock, with_allocation_lock},
    memory::InMemoryAllocationStore,
};

/// The allocation store trait is the attribute get/set interface consumed by the provisioner.
#[async_trait]
pub trait AllocationStore: Send + Sync {
    /// Return the specified allocation.
    async fn get_allocation(&self, id: AllocationId) -> Result<Allocation>;

    /// List the ids of all allocations.
    async fn list_allocations(&self) -> Result<Vec<AllocationId>>;

    /// List the ids of the allocations that have a value for the attribute type.
    async fn list_allocations_with_attribute(&self, name: AttributeName)
    -> Result<Vec<AllocationId>>;

    /// Return the value of an allocation attribute, if any.
    async fn get_attribute(
        &self,
        id: AllocationId,
        name: AttributeName,
    ) -> Result<Option<AttributeValue>>;

    /// Create the attribute unless the allocation already has a value for it.
    ///
    /// Returns `true` if the value was created. An existing value is never
    /// overwritten, whether or not it matches.
    async fn create_attribute_if_absent(
        &self,
        id: AllocationId,
        name: AttributeName,
        value: AttributeValue,
    ) -> Result<bool>;

    /// Create every attribute the allocation does not have a value for yet,
    /// in one atomic write.
    ///
    /// Either all absent attributes are created or, on error, none are.
    /// Returns how many were created.
    async fn create_attributes_if_absent(
        &self,
        id: AllocationId,
        attributes: Vec<(AttributeName, AttributeValue)>,
    ) -> Result<usize>;

    /// Change the status of an allocation.
    async fn set_status(&self, id: AllocationId, status: AllocationStatus) -> Result<()>;

    /// Acquire the exclusive lock of an allocation.
    ///
    /// The lock is held until the returned guard is dropped.
    async fn lock_allocation(&self, id: AllocationId) -> Result<AllocationLock>;
}
