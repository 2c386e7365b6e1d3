//! Per-blob lease management.
//!
//! A `LeaseManager` owns one blob's exclusion token: it acquires the lease,
//! keeps it alive from a background renewal task, and signals renewal failure
//! by inserting the blob name into a shared compromised set. The owner reads
//! that set (not the manager) so there is no reference cycle between a
//! tracker and its lease managers.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use dashmap::DashSet;
use petrel_blob_store::{BlobStore, LeaseId};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BlobStoreSnafu, MissingLeaseSnafu, Result};

/// Lease timing parameters shared by every claim of a tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseConfig {
    /// Lease duration requested from the store (15-60 seconds).
    pub duration: Duration,
    /// Period of the background renewal, strictly less than `duration`.
    pub renewal_interval: Duration,
}

impl LeaseConfig {
    pub fn new(duration: Duration, renewal_interval: Duration) -> Self {
        Self {
            duration,
            renewal_interval,
        }
    }
}

pub struct LeaseManager {
    store: Arc<dyn BlobStore>,
    container: String,
    blob_name: String,
    config: LeaseConfig,
    compromised: Arc<DashSet<String>>,
    lease_id: Mutex<Option<LeaseId>>,
    renewal: Mutex<Option<CancellationToken>>,
}

impl LeaseManager {
    pub fn new(
        store: Arc<dyn BlobStore>,
        container: impl Into<String>,
        blob_name: impl Into<String>,
        config: LeaseConfig,
        compromised: Arc<DashSet<String>>,
    ) -> Self {
        Self {
            store,
            container: container.into(),
            blob_name: blob_name.into(),
            config,
            compromised,
            lease_id: Mutex::new(None),
            renewal: Mutex::new(None),
        }
    }

    pub fn blob_name(&self) -> &str {
        &self.blob_name
    }

    /// Attempt to acquire the lease.
    ///
    /// Returns `None` when another holder owns the lease; any other store
    /// failure propagates.
    pub async fn acquire(&self) -> Result<Option<LeaseId>> {
        let acquired = self
            .store
            .acquire_lease(&self.container, &self.blob_name, self.config.duration)
            .await;

        match acquired {
            Ok(id) => {
                debug!(blob = %self.blob_name, lease = %id, "acquired lease");
                *self.token_slot() = Some(id.clone());
                Ok(Some(id))
            }
            Err(err) if err.is_lease_conflict() => {
                debug!(blob = %self.blob_name, "blob already leased");
                Ok(None)
            }
            Err(err) => Err(err).context(BlobStoreSnafu {
                operation: "acquire_lease",
            }),
        }
    }

    /// Extend the current lease. Failure propagates so the renewal task can
    /// flag the claim as compromised.
    pub async fn renew(&self) -> Result<()> {
        let Some(token) = self.token() else {
            return MissingLeaseSnafu {
                name: self.blob_name.clone(),
            }
            .fail();
        };

        self.store
            .renew_lease(&self.container, &self.blob_name, &token)
            .await
            .context(BlobStoreSnafu {
                operation: "renew_lease",
            })
    }

    /// Relinquish the lease. A lease that is already gone on the store side
    /// is treated as released.
    pub async fn release(&self) -> Result<()> {
        let Some(token) = self.token() else {
            return Ok(());
        };

        match self
            .store
            .release_lease(&self.container, &self.blob_name, &token)
            .await
        {
            Ok(()) => {}
            Err(err) if err.is_lease_not_held() => {
                debug!(blob = %self.blob_name, "lease already expired or released");
            }
            Err(err) => {
                return Err(err).context(BlobStoreSnafu {
                    operation: "release_lease",
                });
            }
        }

        *self.token_slot() = None;
        debug!(blob = %self.blob_name, "released lease");
        Ok(())
    }

    /// Start the background renewal task.
    ///
    /// The task renews at the configured interval until it is stopped or a
    /// renewal fails. On the first failure it records the blob in the
    /// compromised set and exits; no further renewals are attempted.
    pub fn start_renewal(self: &Arc<Self>) {
        let token = CancellationToken::new();
        if let Some(previous) = self.renewal_slot().replace(token.clone()) {
            previous.cancel();
        }

        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(manager.config.renewal_interval) => {
                        if let Err(err) = manager.renew().await {
                            warn!(
                                blob = %manager.blob_name,
                                err = ?err,
                                "lease renewal failed, claim is compromised"
                            );
                            manager.compromised.insert(manager.blob_name.clone());
                            break;
                        }
                        debug!(blob = %manager.blob_name, "renewed lease");
                    }
                }
            }
        });
    }

    /// Cancel the background renewal task. Idempotent.
    pub fn stop_renewal(&self) {
        if let Some(token) = self.renewal_slot().take() {
            token.cancel();
        }
    }

    /// The currently held token, if any.
    pub fn token(&self) -> Option<LeaseId> {
        self.token_slot().clone()
    }

    fn token_slot(&self) -> MutexGuard<'_, Option<LeaseId>> {
        self.lease_id.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn renewal_slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.renewal.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
