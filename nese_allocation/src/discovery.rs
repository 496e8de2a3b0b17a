use std::collections::BTreeSet;

use nese_resources::{AllocationId, AttributeName};
use tracing::debug;

use crate::{AllocationStore, Result};

/// Find the allocations that need provisioning.
///
/// An allocation needs provisioning when it has a desired bucket name but no
/// secret key has been issued for it yet.
pub async fn find_pending_allocations(
    store: &dyn AllocationStore,
) -> Result<BTreeSet<AllocationId>> {
    let with_bucket: BTreeSet<_> = store
        .list_allocations_with_attribute(AttributeName::BucketName)
        .await?
        .into_iter()
        .collect();

    let with_secret: BTreeSet<_> = store
        .list_allocations_with_attribute(AttributeName::SecretKey)
        .await?
        .into_iter()
        .collect();

    let pending: BTreeSet<_> = with_bucket.difference(&with_secret).copied().collect();

    debug!(
        with_bucket = with_bucket.len(),
        with_secret = with_secret.len(),
        pending = pending.len(),
        "Discovered allocations pending provisioning"
    );

    Ok(pending)
}
