//! In-memory implementation of the blob-store port.
//!
//! This implementation stores all data in memory and is suitable for testing
//! and development. Leases expire against the tokio clock, so paused-clock
//! tests can let a lease lapse with `tokio::time::advance`.

use std::{
    collections::{BTreeMap, HashMap},
    ops::Bound,
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use time::OffsetDateTime;
use tokio::{sync::RwLock, time::Instant};
use tracing::trace;
use uuid::Uuid;

use crate::{
    error::{
        BlobNotFoundSnafu, ContainerNotFoundSnafu, LeaseConflictSnafu, LeaseNotHeldSnafu,
        PreconditionFailedSnafu, Result, TagLimitSnafu,
    },
    BlobDownload, BlobInfo, BlobStore, LeaseId, ListBlobsRequest, ListBlobsResponse,
    DEFAULT_LISTING_PAGE_SIZE,
};

/// The store rejects writes that would leave a blob with more than this many
/// index tags.
pub const MAX_TAGS_PER_BLOB: usize = 10;

const READ_CHUNK_SIZE: usize = 8 * 1024;

#[derive(Debug, Clone)]
struct LeaseState {
    id: LeaseId,
    duration: Duration,
    expires_at: Instant,
}

impl LeaseState {
    fn is_live(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

#[derive(Debug, Clone)]
struct BlobEntry {
    data: Bytes,
    last_modified: OffsetDateTime,
    tags: BTreeMap<String, String>,
    lease: Option<LeaseState>,
}

impl BlobEntry {
    fn live_lease(&self) -> Option<&LeaseState> {
        self.lease.as_ref().filter(|lease| lease.is_live())
    }

    /// Validate a lease-conditional write against the blob's current lease
    /// state: a leased blob requires the matching token, an unleased blob
    /// rejects any token.
    fn check_write_condition(
        &self,
        container: &str,
        name: &str,
        token: Option<&LeaseId>,
    ) -> Result<()> {
        match (self.live_lease(), token) {
            (Some(lease), Some(token)) if lease.id == *token => Ok(()),
            (Some(_), Some(_)) => PreconditionFailedSnafu {
                container,
                name,
                message: "lease token does not match the current lease",
            }
            .fail(),
            (Some(_), None) => PreconditionFailedSnafu {
                container,
                name,
                message: "blob is leased and no lease token was supplied",
            }
            .fail(),
            (None, Some(_)) => PreconditionFailedSnafu {
                container,
                name,
                message: "a lease token was supplied but no lease is held",
            }
            .fail(),
            (None, None) => Ok(()),
        }
    }

    fn info(&self, name: &str) -> BlobInfo {
        BlobInfo {
            name: name.to_string(),
            size: Some(self.data.len() as u64),
            last_modified: self.last_modified,
            tags: Some(self.tags.clone()),
        }
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    containers: HashMap<String, BTreeMap<String, BlobEntry>>,
}

impl StoreInner {
    fn container(&self, container: &str) -> Result<&BTreeMap<String, BlobEntry>> {
        self.containers
            .get(container)
            .ok_or_else(|| ContainerNotFoundSnafu { container }.build())
    }

    fn container_mut(&mut self, container: &str) -> Result<&mut BTreeMap<String, BlobEntry>> {
        self.containers
            .get_mut(container)
            .ok_or_else(|| ContainerNotFoundSnafu { container }.build())
    }

    fn entry(&self, container: &str, name: &str) -> Result<&BlobEntry> {
        self.container(container)?
            .get(name)
            .ok_or_else(|| BlobNotFoundSnafu { container, name }.build())
    }

    fn entry_mut(&mut self, container: &str, name: &str) -> Result<&mut BlobEntry> {
        self.container_mut(container)?
            .get_mut(name)
            .ok_or_else(|| BlobNotFoundSnafu { container, name }.build())
    }
}

/// In-memory blob store backing tests and development mode.
#[derive(Debug, Default)]
pub struct InMemoryBlobStore {
    inner: RwLock<StoreInner>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a container if it does not exist.
    pub async fn create_container(&self, container: &str) {
        let mut inner = self.inner.write().await;
        inner.containers.entry(container.to_string()).or_default();
    }

    /// Upload a blob, replacing any existing content and tags.
    pub async fn put_blob(&self, container: &str, name: &str, data: impl Into<Bytes>) -> Result<()> {
        self.put_blob_with_tags(container, name, data, BTreeMap::new())
            .await
    }

    /// Upload a blob with an initial tag set.
    pub async fn put_blob_with_tags(
        &self,
        container: &str,
        name: &str,
        data: impl Into<Bytes>,
        tags: BTreeMap<String, String>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let blobs = inner.container_mut(container)?;
        blobs.insert(
            name.to_string(),
            BlobEntry {
                data: data.into(),
                last_modified: OffsetDateTime::now_utc(),
                tags,
                lease: None,
            },
        );
        Ok(())
    }

    /// Names of every blob currently in the container, in lexicographic
    /// order.
    pub async fn blob_names(&self, container: &str) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        Ok(inner.container(container)?.keys().cloned().collect())
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn list_blobs(
        &self,
        container: &str,
        request: ListBlobsRequest,
    ) -> Result<ListBlobsResponse> {
        let inner = self.inner.read().await;
        let blobs = inner.container(container)?;

        let page_size = request
            .page_size
            .unwrap_or(DEFAULT_LISTING_PAGE_SIZE)
            .max(1);
        let start = match &request.page_token {
            Some(token) => Bound::Excluded(token.clone()),
            None => Bound::Unbounded,
        };

        let prefix = request.prefix.as_deref().unwrap_or("");
        let mut matching = blobs
            .range::<String, _>((start, Bound::Unbounded))
            .filter(|(name, _)| name.starts_with(prefix));

        let mut page = Vec::with_capacity(page_size.min(64));
        for (name, entry) in matching.by_ref().take(page_size) {
            page.push(entry.info(name));
        }

        let next_page_token = if matching.next().is_some() {
            page.last().map(|info| info.name.clone())
        } else {
            None
        };

        trace!(
            container,
            blobs = page.len(),
            more = next_page_token.is_some(),
            "listed blob page"
        );

        Ok(ListBlobsResponse {
            blobs: page,
            next_page_token,
        })
    }

    async fn read_blob(&self, container: &str, name: &str) -> Result<BlobDownload> {
        let inner = self.inner.read().await;
        let entry = inner.entry(container, name)?;

        let data = entry.data.clone();
        let chunks: Vec<Result<Bytes>> = (0..data.len())
            .step_by(READ_CHUNK_SIZE)
            .map(|offset| Ok(data.slice(offset..data.len().min(offset + READ_CHUNK_SIZE))))
            .collect();

        Ok(BlobDownload {
            info: entry.info(name),
            stream: stream::iter(chunks).boxed(),
        })
    }

    async fn get_tags(&self, container: &str, name: &str) -> Result<BTreeMap<String, String>> {
        let inner = self.inner.read().await;
        Ok(inner.entry(container, name)?.tags.clone())
    }

    async fn set_tags(
        &self,
        container: &str,
        name: &str,
        tags: BTreeMap<String, String>,
        lease: Option<&LeaseId>,
    ) -> Result<()> {
        if tags.len() > MAX_TAGS_PER_BLOB {
            return TagLimitSnafu {
                container,
                name,
                count: tags.len(),
                limit: MAX_TAGS_PER_BLOB,
            }
            .fail();
        }

        let mut inner = self.inner.write().await;
        let entry = inner.entry_mut(container, name)?;
        entry.check_write_condition(container, name, lease)?;
        entry.tags = tags;
        Ok(())
    }

    async fn blob_exists(&self, container: &str, name: &str) -> Result<bool> {
        let inner = self.inner.read().await;
        Ok(inner.container(container)?.contains_key(name))
    }

    async fn copy_blob(
        &self,
        source_container: &str,
        name: &str,
        destination_container: &str,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;

        let source = inner.entry(source_container, name)?;
        let copied = BlobEntry {
            data: source.data.clone(),
            last_modified: OffsetDateTime::now_utc(),
            tags: source.tags.clone(),
            lease: None,
        };

        let destination = inner.container_mut(destination_container)?;
        destination.insert(name.to_string(), copied);
        Ok(())
    }

    async fn delete_blob(
        &self,
        container: &str,
        name: &str,
        lease: Option<&LeaseId>,
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entry = inner.entry(container, name)?;
        entry.check_write_condition(container, name, lease)?;

        // Removing the entry drops its lease with it.
        inner.container_mut(container)?.remove(name);
        Ok(())
    }

    async fn acquire_lease(
        &self,
        container: &str,
        name: &str,
        duration: Duration,
    ) -> Result<LeaseId> {
        let mut inner = self.inner.write().await;
        let entry = inner.entry_mut(container, name)?;

        if entry.live_lease().is_some() {
            return LeaseConflictSnafu { container, name }.fail();
        }

        let id = LeaseId::new(Uuid::new_v4().to_string());
        entry.lease = Some(LeaseState {
            id: id.clone(),
            duration,
            expires_at: Instant::now() + duration,
        });
        Ok(id)
    }

    async fn renew_lease(&self, container: &str, name: &str, lease: &LeaseId) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entry = inner.entry_mut(container, name)?;

        match entry.lease.as_mut() {
            Some(state) if state.id == *lease && state.is_live() => {
                state.expires_at = Instant::now() + state.duration;
                Ok(())
            }
            _ => LeaseNotHeldSnafu { container, name }.fail(),
        }
    }

    async fn release_lease(&self, container: &str, name: &str, lease: &LeaseId) -> Result<()> {
        let mut inner = self.inner.write().await;
        let entry = inner.entry_mut(container, name)?;

        match &entry.lease {
            Some(state) if state.id == *lease => {
                entry.lease = None;
                Ok(())
            }
            _ => LeaseNotHeldSnafu { container, name }.fail(),
        }
    }
}
