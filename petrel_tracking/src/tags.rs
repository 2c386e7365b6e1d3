//! Index-tag state tracker for multi-replica deployments.

use std::{collections::BTreeMap, sync::Arc};

use dashmap::{DashMap, DashSet};
use petrel_blob_store::{BlobInfo, BlobStore, LeaseId};
use snafu::ResultExt;
use tracing::{debug, info, warn};

use crate::{
    error::{BlobStoreSnafu, Result},
    lease::{LeaseConfig, LeaseManager},
    now_rfc3339, StateTracker,
};

/// Reserved tag keys. Five of the store's ten tag slots; user-defined tags on
/// the same blob are preserved across every write.
pub const TAG_STATUS: &str = "logstash_status";
pub const TAG_PROCESSOR: &str = "logstash_processor";
pub const TAG_STARTED: &str = "logstash_started";
pub const TAG_COMPLETED: &str = "logstash_completed";
pub const TAG_ERROR: &str = "logstash_error";

pub const STATUS_PROCESSING: &str = "processing";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

/// Maximum length of the `logstash_error` tag value.
pub const MAX_ERROR_LENGTH: usize = 256;

/// Tracks processing state in blob index tags, coordinated across replicas
/// by per-blob leases.
pub struct TagStateTracker {
    store: Arc<dyn BlobStore>,
    container: String,
    processor: String,
    lease_config: LeaseConfig,
    active_leases: DashMap<String, Arc<LeaseManager>>,
    compromised: Arc<DashSet<String>>,
}

impl TagStateTracker {
    pub fn new(
        store: Arc<dyn BlobStore>,
        container: impl Into<String>,
        processor: impl Into<String>,
        lease_config: LeaseConfig,
    ) -> Self {
        let processor = processor.into();
        info!(processor = %processor, "tag state tracker initialized");
        Self {
            store,
            container: container.into(),
            processor,
            lease_config,
            active_leases: DashMap::new(),
            compromised: Arc::new(DashSet::new()),
        }
    }

    fn new_lease_manager(&self, name: &str) -> Arc<LeaseManager> {
        Arc::new(LeaseManager::new(
            Arc::clone(&self.store),
            self.container.clone(),
            name,
            self.lease_config,
            Arc::clone(&self.compromised),
        ))
    }

    fn held_token(&self, name: &str) -> Option<LeaseId> {
        self.active_leases
            .get(name)
            .and_then(|entry| entry.value().token())
    }

    /// Tags of a listed blob: the listing's prefetched tags when present,
    /// a per-blob read otherwise.
    async fn tags_of(&self, blob: &BlobInfo) -> Result<BTreeMap<String, String>> {
        if let Some(tags) = &blob.tags {
            return Ok(tags.clone());
        }
        self.store
            .get_tags(&self.container, &blob.name)
            .await
            .context(BlobStoreSnafu {
                operation: "get_tags",
            })
    }
}

#[async_trait::async_trait]
impl StateTracker for TagStateTracker {
    /// A blob is a candidate when its status tag is absent, empty, or
    /// `failed`. A blob whose tags cannot be read is skipped for the cycle.
    async fn filter_candidates(&self, blobs: Vec<BlobInfo>) -> Result<Vec<BlobInfo>> {
        let mut candidates = Vec::with_capacity(blobs.len());
        for blob in blobs {
            let tags = match self.tags_of(&blob).await {
                Ok(tags) => tags,
                Err(err) => {
                    warn!(blob = %blob.name, err = ?err, "failed to read tags, skipping blob");
                    continue;
                }
            };

            match tags.get(TAG_STATUS) {
                None => candidates.push(blob),
                Some(status) if status.is_empty() || status == STATUS_FAILED => {
                    candidates.push(blob)
                }
                Some(status) => {
                    debug!(blob = %blob.name, status = %status, "excluding blob");
                }
            }
        }
        Ok(candidates)
    }

    async fn claim(&self, name: &str) -> Result<bool> {
        let lease = self.new_lease_manager(name);
        let Some(lease_id) = lease.acquire().await? else {
            return Ok(false);
        };

        let existing = match self.store.get_tags(&self.container, name).await {
            Ok(tags) => tags,
            Err(err) => {
                let _ = lease.release().await;
                return Err(err).context(BlobStoreSnafu {
                    operation: "get_tags",
                });
            }
        };

        let mut merged = existing;
        merged.insert(TAG_STATUS.to_string(), STATUS_PROCESSING.to_string());
        merged.insert(TAG_PROCESSOR.to_string(), self.processor.clone());
        merged.insert(TAG_STARTED.to_string(), now_rfc3339());

        let written = self
            .store
            .set_tags(&self.container, name, merged, Some(&lease_id))
            .await;
        match written {
            Ok(()) => {}
            Err(err) if err.is_precondition_failed() => {
                debug!(blob = %name, "tag write precondition failed, releasing lease");
                let _ = lease.release().await;
                return Ok(false);
            }
            Err(err) => {
                let _ = lease.release().await;
                return Err(err).context(BlobStoreSnafu {
                    operation: "set_tags",
                });
            }
        }

        lease.start_renewal();
        self.active_leases.insert(name.to_string(), lease);
        debug!(blob = %name, lease = %lease_id, "claimed blob");
        Ok(true)
    }

    async fn mark_completed(&self, name: &str) -> Result<()> {
        let mut merged = self
            .store
            .get_tags(&self.container, name)
            .await
            .context(BlobStoreSnafu {
                operation: "get_tags",
            })?;

        merged.insert(TAG_STATUS.to_string(), STATUS_COMPLETED.to_string());
        merged.insert(TAG_COMPLETED.to_string(), now_rfc3339());
        merged.insert(TAG_PROCESSOR.to_string(), self.processor.clone());
        merged.remove(TAG_STARTED);
        merged.remove(TAG_ERROR);

        let token = self.held_token(name);
        self.store
            .set_tags(&self.container, name, merged, token.as_ref())
            .await
            .context(BlobStoreSnafu {
                operation: "set_tags",
            })?;
        debug!(blob = %name, "marked blob completed");
        Ok(())
    }

    async fn mark_failed(&self, name: &str, reason: &str) -> Result<()> {
        let mut merged = self
            .store
            .get_tags(&self.container, name)
            .await
            .context(BlobStoreSnafu {
                operation: "get_tags",
            })?;

        let sanitized = sanitize_error(reason);
        merged.insert(TAG_STATUS.to_string(), STATUS_FAILED.to_string());
        merged.insert(TAG_ERROR.to_string(), sanitized.clone());
        merged.insert(TAG_PROCESSOR.to_string(), self.processor.clone());

        let token = self.held_token(name);
        self.store
            .set_tags(&self.container, name, merged, token.as_ref())
            .await
            .context(BlobStoreSnafu {
                operation: "set_tags",
            })?;
        debug!(blob = %name, error = %sanitized, "marked blob failed");
        Ok(())
    }

    async fn release(&self, name: &str) -> Result<()> {
        let Some((_, lease)) = self.active_leases.remove(name) else {
            warn!(blob = %name, "no active lease found during release");
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
        info!("tag state tracker closed");
    }
}

/// Restrict an error reason to the tag-value alphabet and length: characters
/// outside `[A-Za-z0-9 +-./:=_]` become `_`, the result is truncated to
/// [`MAX_ERROR_LENGTH`], and an empty reason becomes `unknown`.
pub fn sanitize_error(reason: &str) -> String {
    let sanitized: String = reason
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || " +-./:=_".contains(c) {
                c
            } else {
                '_'
            }
        })
        .take(MAX_ERROR_LENGTH)
        .collect();

    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_disallowed_characters() {
        assert_eq!(
            sanitize_error("status 500: retry @ /logs?id=1"),
            "status 500: retry _ /logs_id=1"
        );
    }

    #[test]
    fn sanitize_truncates_to_limit() {
        let long = "x".repeat(MAX_ERROR_LENGTH + 40);
        assert_eq!(sanitize_error(&long).len(), MAX_ERROR_LENGTH);
    }

    #[test]
    fn sanitize_defaults_empty_reasons() {
        assert_eq!(sanitize_error(""), "unknown");
    }
}
