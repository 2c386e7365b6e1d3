//! Container-move state tracker for multi-replica deployments.
//!
//! State is implicit in which container a blob resides in: blobs arrive in
//! the incoming container and are moved to the archive container on success
//! or the errors container on failure. Per-blob leases coordinate replicas.
//!
//! Crash recovery: a blob present in both incoming and archive was fully
//! processed (the copy landed but the delete did not), so the candidate
//! filter probes the archive and skips it.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use petrel_blob_store::{BlobInfo, BlobStore};
use snafu::ResultExt;
use tracing::{debug, info, warn};

use crate::{
    error::{BlobStoreSnafu, MissingLeaseSnafu, Result},
    lease::{LeaseConfig, LeaseManager},
    StateTracker,
};

pub struct ContainerStateTracker {
    store: Arc<dyn BlobStore>,
    incoming: String,
    archive: String,
    errors: String,
    lease_config: LeaseConfig,
    active_leases: DashMap<String, Arc<LeaseManager>>,
    compromised: Arc<DashSet<String>>,
}

impl ContainerStateTracker {
    pub fn new(
        store: Arc<dyn BlobStore>,
        incoming: impl Into<String>,
        archive: impl Into<String>,
        errors: impl Into<String>,
        processor: &str,
        lease_config: LeaseConfig,
    ) -> Self {
        let incoming = incoming.into();
        let archive = archive.into();
        let errors = errors.into();
        info!(
            processor,
            incoming = %incoming,
            archive = %archive,
            errors = %errors,
            "container state tracker initialized"
        );
        Self {
            store,
            incoming,
            archive,
            errors,
            lease_config,
            active_leases: DashMap::new(),
            compromised: Arc::new(DashSet::new()),
        }
    }

    /// Copy the blob to `destination`, then delete it from incoming under
    /// the held lease token. The copy must land before the delete: a failed
    /// copy leaves the blob in incoming for retry, and a failed delete after
    /// a successful copy is repaired by the candidate filter next cycle.
    async fn move_blob(&self, name: &str, destination: &str) -> Result<()> {
        let Some(lease) = self
            .active_leases
            .get(name)
            .map(|entry| Arc::clone(entry.value()))
        else {
            return MissingLeaseSnafu { name }.fail();
        };
        let Some(token) = lease.token() else {
            return MissingLeaseSnafu { name }.fail();
        };

        self.store
            .copy_blob(&self.incoming, name, destination)
            .await
            .context(BlobStoreSnafu {
                operation: "copy_blob",
            })?;
        debug!(blob = %name, destination, "copied blob");

        self.store
            .delete_blob(&self.incoming, name, Some(&token))
            .await
            .context(BlobStoreSnafu {
                operation: "delete_blob",
            })?;
        debug!(blob = %name, "deleted blob from incoming");

        // Deleting the blob released its lease implicitly; only the renewal
        // task and the map entry are left to clean up.
        lease.stop_renewal();
        self.active_leases.remove(name);
        Ok(())
    }
}

#[async_trait::async_trait]
impl StateTracker for ContainerStateTracker {
    /// One existence probe against the archive per listed blob; a blob
    /// already present there was processed by an earlier (possibly crashed)
    /// cycle and is excluded.
    async fn filter_candidates(&self, blobs: Vec<BlobInfo>) -> Result<Vec<BlobInfo>> {
        let mut candidates = Vec::with_capacity(blobs.len());
        for blob in blobs {
            let archived = self
                .store
                .blob_exists(&self.archive, &blob.name)
                .await
                .context(BlobStoreSnafu {
                    operation: "blob_exists",
                })?;

            if archived {
                debug!(blob = %blob.name, "excluding blob already present in archive");
            } else {
                candidates.push(blob);
            }
        }
        Ok(candidates)
    }

    async fn claim(&self, name: &str) -> Result<bool> {
        let lease = Arc::new(LeaseManager::new(
            Arc::clone(&self.store),
            self.incoming.clone(),
            name,
            self.lease_config,
            Arc::clone(&self.compromised),
        ));

        let Some(lease_id) = lease.acquire().await? else {
            return Ok(false);
        };

        lease.start_renewal();
        self.active_leases.insert(name.to_string(), lease);
        debug!(blob = %name, lease = %lease_id, "claimed blob");
        Ok(true)
    }

    async fn mark_completed(&self, name: &str) -> Result<()> {
        self.move_blob(name, &self.archive).await
    }

    async fn mark_failed(&self, name: &str, reason: &str) -> Result<()> {
        debug!(blob = %name, reason, "marking blob failed");
        self.move_blob(name, &self.errors).await
    }

    /// Relinquish a claim that ended without a terminal mark. After a
    /// terminal mark the map entry is already gone (the delete released the
    /// lease), so this is a no-op with a diagnostic.
    async fn release(&self, name: &str) -> Result<()> {
        let Some((_, lease)) = self.active_leases.remove(name) else {
            debug!(blob = %name, "no active lease during release, claim already terminal");
            return Ok(());
        };

        lease.stop_renewal();
        lease.release().await?;
        debug!(blob = %name, "released claim");
        Ok(())
    }

    fn was_lease_renewal_compromised(&self, name: &str) -> bool {
        self.compromised.remove(name).is_some()
    }

    async fn close(&self) {
        let names: Vec<String> = self
            .active_leases
            .iter()
            .map(|entry| entry.key().clone())
            .collect();

        for name in names {
            if let Some((_, lease)) = self.active_leases.remove(&name) {
                lease.stop_renewal();
                if let Err(err) = lease.release().await {
                    warn!(blob = %name, err = ?err, "failed to release lease during close");
                }
            }
        }
        self.compromised.clear();
        info!("container state tracker closed");
    }
}
