//! Allocations kept in a JSON file between CLI invocations.

use std::{collections::BTreeMap, path::Path, sync::Arc};

use nese_allocation::{AllocationStore, InMemoryAllocationStore};
use nese_resources::{Allocation, AllocationId, AttributeName, AttributeValue};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::error::{AllocationStoreSnafu, AllocationsFileSnafu, AllocationsJsonSnafu, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRecord {
    #[serde(flatten)]
    pub allocation: Allocation,
    #[serde(default)]
    pub attributes: BTreeMap<AttributeName, AttributeValue>,
}

/// Load the allocations in `path` into a new in-memory store.
pub async fn load(path: &Path) -> Result<Arc<InMemoryAllocationStore>> {
    let data = tokio::fs::read(path)
        .await
        .context(AllocationsFileSnafu { path })?;
    let records: Vec<AllocationRecord> =
        serde_json::from_slice(&data).context(AllocationsJsonSnafu { path })?;

    let store = Arc::new(InMemoryAllocationStore::new());
    seed(&store, records).await?;
    Ok(store)
}

pub async fn seed(store: &InMemoryAllocationStore, records: Vec<AllocationRecord>) -> Result<()> {
    for record in records {
        let id = record.allocation.id;
        store.insert_allocation(record.allocation).await;
        for (name, value) in record.attributes {
            store
                .set_attribute(id, name, value)
                .await
                .context(AllocationStoreSnafu {
                    operation: "set_attribute",
                })?;
        }
    }
    Ok(())
}

/// Write every allocation of `store` back to `path`.
pub async fn save(store: &InMemoryAllocationStore, path: &Path) -> Result<()> {
    let records = snapshot(store).await?;
    let data = serde_json::to_vec_pretty(&records).context(AllocationsJsonSnafu { path })?;
    tokio::fs::write(path, data)
        .await
        .context(AllocationsFileSnafu { path })
}

pub async fn snapshot(store: &InMemoryAllocationStore) -> Result<Vec<AllocationRecord>> {
    let ids: Vec<AllocationId> = store
        .list_allocations()
        .await
        .context(AllocationStoreSnafu {
            operation: "list_allocations",
        })?;

    let mut records = Vec::with_capacity(ids.len());
    for id in ids {
        let allocation = store
            .get_allocation(id)
            .await
            .context(AllocationStoreSnafu {
                operation: "get_allocation",
            })?;
        let attributes = store.attributes(id).await.context(AllocationStoreSnafu {
            operation: "attributes",
        })?;
        records.push(AllocationRecord {
            allocation,
            attributes,
        });
    }
    Ok(records)
}

/// Allocations served by `nese dev` when no file is given.
pub fn dev_records() -> Vec<AllocationRecord> {
    let record = |id: u64, bucket: &str, quota: i64| AllocationRecord {
        allocation: Allocation::new(AllocationId::new(id), format!("Dev allocation {id}"))
            .with_project("Dev project", "dev-pi")
            .with_resource(nese_provisioner::DEFAULT_MANAGED_RESOURCE)
            .with_quantity(1),
        attributes: BTreeMap::from([
            (AttributeName::BucketName, AttributeValue::text(bucket)),
            (AttributeName::Quota, AttributeValue::Int(quota)),
        ]),
    };

    vec![record(1, "dev-bucket-one", 1), record(2, "dev-bucket-two", 5)]
}
