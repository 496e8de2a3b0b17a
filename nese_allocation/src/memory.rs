//! In-memory implementation of the allocation store trait.
//!
//! This implementation stores all data in memory and is suitable for testing
//! and development. It uses a RwLock for thread-safe access and one mutex per
//! allocation for the row lock.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use dashmap::DashMap;
use nese_resources::{Allocation, AllocationId, AllocationStatus, AttributeName, AttributeValue};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::{AllocationLock, AllocationStore, AllocationStoreError, Result};

#[derive(Debug)]
struct AllocationRecord {
    allocation: Allocation,
    attributes: BTreeMap<AttributeName, AttributeValue>,
}

/// In-memory implementation of the allocation store.
#[derive(Debug, Default)]
pub struct InMemoryAllocationStore {
    /// Map of allocation id to allocation data.
    records: RwLock<HashMap<AllocationId, AllocationRecord>>,
    /// Map of allocation id to its row lock.
    locks: DashMap<AllocationId, Arc<Mutex<()>>>,
}

impl InMemoryAllocationStore {
    /// Create a new, empty, in-memory allocation store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an allocation, keeping its attributes.
    pub async fn insert_allocation(&self, allocation: Allocation) {
        let mut records = self.records.write().await;
        match records.get_mut(&allocation.id) {
            Some(record) => record.allocation = allocation,
            None => {
                records.insert(
                    allocation.id,
                    AllocationRecord {
                        allocation,
                        attributes: BTreeMap::new(),
                    },
                );
            }
        }
    }

    /// Set an attribute value, replacing any existing value.
    ///
    /// This is how the allocation-management system edits attributes, the
    /// provisioner itself only creates missing ones.
    pub async fn set_attribute(
        &self,
        id: AllocationId,
        name: AttributeName,
        value: AttributeValue,
    ) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or(AllocationStoreError::NotFound { id })?;
        record.attributes.insert(name, value);
        Ok(())
    }

    /// Remove an attribute value.
    pub async fn remove_attribute(&self, id: AllocationId, name: AttributeName) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or(AllocationStoreError::NotFound { id })?;
        record.attributes.remove(&name);
        Ok(())
    }

    /// Return a snapshot of all the attributes of an allocation.
    pub async fn attributes(
        &self,
        id: AllocationId,
    ) -> Result<BTreeMap<AttributeName, AttributeValue>> {
        let records = self.records.read().await;
        records
            .get(&id)
            .map(|record| record.attributes.clone())
            .ok_or(AllocationStoreError::NotFound { id })
    }

    fn check_kind(name: AttributeName, value: &AttributeValue) -> Result<()> {
        if value.kind() != name.kind() {
            return Err(AllocationStoreError::InvalidAttribute {
                name,
                message: format!("expected {:?} value, got {:?}", name.kind(), value.kind()),
            });
        }
        Ok(())
    }

    fn row_lock(&self, id: AllocationId) -> Arc<Mutex<()>> {
        self.locks.entry(id).or_default().clone()
    }
}

#[async_trait]
impl AllocationStore for InMemoryAllocationStore {
    async fn get_allocation(&self, id: AllocationId) -> Result<Allocation> {
        let records = self.records.read().await;
        records
            .get(&id)
            .map(|record| record.allocation.clone())
            .ok_or(AllocationStoreError::NotFound { id })
    }

    async fn list_allocations(&self) -> Result<Vec<AllocationId>> {
        let records = self.records.read().await;
        let mut ids: Vec<_> = records.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }

    async fn list_allocations_with_attribute(
        &self,
        name: AttributeName,
    ) -> Result<Vec<AllocationId>> {
        let records = self.records.read().await;
        let mut ids: Vec<_> = records
            .iter()
            .filter(|(_, record)| record.attributes.contains_key(&name))
            .map(|(id, _)| *id)
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn get_attribute(
        &self,
        id: AllocationId,
        name: AttributeName,
    ) -> Result<Option<AttributeValue>> {
        let records = self.records.read().await;
        let record = records
            .get(&id)
            .ok_or(AllocationStoreError::NotFound { id })?;
        Ok(record.attributes.get(&name).cloned())
    }

    async fn create_attribute_if_absent(
        &self,
        id: AllocationId,
        name: AttributeName,
        value: AttributeValue,
    ) -> Result<bool> {
        Self::check_kind(name, &value)?;

        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or(AllocationStoreError::NotFound { id })?;

        if record.attributes.contains_key(&name) {
            debug!(allocation = %id, attribute = %name, "Attribute already present, not overwriting");
            return Ok(false);
        }

        record.attributes.insert(name, value);
        Ok(true)
    }

    async fn create_attributes_if_absent(
        &self,
        id: AllocationId,
        attributes: Vec<(AttributeName, AttributeValue)>,
    ) -> Result<usize> {
        for (name, value) in &attributes {
            Self::check_kind(*name, value)?;
        }

        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or(AllocationStoreError::NotFound { id })?;

        let mut created = 0;
        for (name, value) in attributes {
            if record.attributes.contains_key(&name) {
                debug!(allocation = %id, attribute = %name, "Attribute already present, not overwriting");
                continue;
            }
            record.attributes.insert(name, value);
            created += 1;
        }

        Ok(created)
    }

    async fn set_status(&self, id: AllocationId, status: AllocationStatus) -> Result<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .ok_or(AllocationStoreError::NotFound { id })?;
        record.allocation.status = status;
        Ok(())
    }

    async fn lock_allocation(&self, id: AllocationId) -> Result<AllocationLock> {
        if !self.records.read().await.contains_key(&id) {
            return Err(AllocationStoreError::NotFound { id });
        }

        let guard = self.row_lock(id).lock_owned().await;
        Ok(AllocationLock::new(id, guard))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u64) -> AllocationId {
        AllocationId::new(n)
    }

    async fn store_with_allocation() -> InMemoryAllocationStore {
        let store = InMemoryAllocationStore::new();
        store
            .insert_allocation(Allocation::new(id(1), "lab storage").with_quantity(3))
            .await;
        store
    }

    #[tokio::test]
    async fn test_create_attribute_if_absent_never_overwrites() {
        let store = store_with_allocation().await;

        let created = store
            .create_attribute_if_absent(id(1), AttributeName::AccessKey, AttributeValue::text("a"))
            .await
            .unwrap();
        assert!(created);

        let created = store
            .create_attribute_if_absent(id(1), AttributeName::AccessKey, AttributeValue::text("b"))
            .await
            .unwrap();
        assert!(!created);

        let value = store
            .get_attribute(id(1), AttributeName::AccessKey)
            .await
            .unwrap();
        assert_eq!(value, Some(AttributeValue::text("a")));
    }

    #[tokio::test]
    async fn test_create_attribute_checks_kind() {
        let store = store_with_allocation().await;

        let err = store
            .create_attribute_if_absent(id(1), AttributeName::Quota, AttributeValue::text("5"))
            .await
            .unwrap_err();
        assert!(matches!(err, AllocationStoreError::InvalidAttribute { .. }));
    }

    #[tokio::test]
    async fn test_batch_create_is_all_or_nothing() {
        let store = store_with_allocation().await;
        store
            .set_attribute(id(1), AttributeName::BucketName, AttributeValue::text("lab"))
            .await
            .unwrap();

        let err = store
            .create_attributes_if_absent(
                id(1),
                vec![
                    (AttributeName::AccessKey, AttributeValue::text("a")),
                    (AttributeName::SecretKey, AttributeValue::text("s")),
                    (AttributeName::Quota, AttributeValue::text("5")),
                ],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AllocationStoreError::InvalidAttribute { .. }));
        assert_eq!(store.attributes(id(1)).await.unwrap().len(), 1);

        let created = store
            .create_attributes_if_absent(
                id(1),
                vec![
                    (AttributeName::BucketName, AttributeValue::text("other")),
                    (AttributeName::AccessKey, AttributeValue::text("a")),
                    (AttributeName::SecretKey, AttributeValue::text("s")),
                    (AttributeName::Quota, AttributeValue::Int(5)),
                ],
            )
            .await
            .unwrap();
        assert_eq!(created, 3);
        assert_eq!(
            store
                .get_attribute(id(1), AttributeName::BucketName)
                .await
                .unwrap(),
            Some(AttributeValue::text("lab"))
        );
    }

    #[tokio::test]
    async fn test_unknown_allocation() {
        let store = InMemoryAllocationStore::new();

        let err = store.get_allocation(id(9)).await.unwrap_err();
        assert!(err.is_not_found());

        let err = store.lock_allocation(id(9)).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_set_status() {
        let store = store_with_allocation().await;

        store
            .set_status(id(1), AllocationStatus::ProvisioningError)
            .await
            .unwrap();

        let allocation = store.get_allocation(id(1)).await.unwrap();
        assert_eq!(allocation.status, AllocationStatus::ProvisioningError);
    }

    #[tokio::test]
    async fn test_insert_keeps_attributes() {
        let store = store_with_allocation().await;
        store
            .set_attribute(id(1), AttributeName::BucketName, AttributeValue::text("lab"))
            .await
            .unwrap();

        store
            .insert_allocation(Allocation::new(id(1), "renamed"))
            .await;

        let attributes = store.attributes(id(1)).await.unwrap();
        assert_eq!(
            attributes.get(&AttributeName::BucketName),
            Some(&AttributeValue::text("lab"))
        );
        assert_eq!(
            store.get_allocation(id(1)).await.unwrap().description,
            "renamed"
        );
    }
}
