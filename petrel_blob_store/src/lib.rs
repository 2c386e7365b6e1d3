//! Abstract blob-store port consumed by the petrel ingestion engine.
//!
//! The `BlobStore` trait captures every capability the engine needs from an
//! object store: paginated listing, byte-stream reads, index tags with
//! optional lease conditions, per-blob existence probes, server-side copies,
//! deletes, and short-lived blob leases. Cloud SDK adapters implement this
//! trait outside the engine; the in-memory implementation in this crate backs
//! tests and development mode.

mod error;
mod error_kind;
mod memory;

use std::{collections::BTreeMap, fmt, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use time::OffsetDateTime;

pub use self::error::{BlobStoreError, Result};
pub use self::error_kind::ErrorKind;
pub use self::memory::InMemoryBlobStore;

/// Default number of blobs returned per listing page when the caller does not
/// specify one.
pub const DEFAULT_LISTING_PAGE_SIZE: usize = 5_000;

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// List blobs in a container, one page at a time, in the store's natural
    /// (lexicographic) order.
    async fn list_blobs(
        &self,
        container: &str,
        request: ListBlobsRequest,
    ) -> Result<ListBlobsResponse>;

    /// Open a blob's bytes as a chunked stream together with its properties.
    async fn read_blob(&self, container: &str, name: &str) -> Result<BlobDownload>;

    /// Read the blob's index tags.
    async fn get_tags(&self, container: &str, name: &str) -> Result<BTreeMap<String, String>>;

    /// Replace the blob's index tags.
    ///
    /// When the blob is leased, the matching token must be supplied as the
    /// write condition or the store rejects the write with
    /// [`BlobStoreError::PreconditionFailed`].
    async fn set_tags(
        &self,
        container: &str,
        name: &str,
        tags: BTreeMap<String, String>,
        lease: Option<&LeaseId>,
    ) -> Result<()>;

    /// Probe whether a blob exists in a container.
    async fn blob_exists(&self, container: &str, name: &str) -> Result<bool>;

    /// Server-side copy of a blob to another container under the same name,
    /// awaiting copy completion.
    async fn copy_blob(
        &self,
        source_container: &str,
        name: &str,
        destination_container: &str,
    ) -> Result<()>;

    /// Delete a blob. Deleting a leased blob requires the matching token and
    /// implicitly releases the lease.
    async fn delete_blob(&self, container: &str, name: &str, lease: Option<&LeaseId>)
        -> Result<()>;

    /// Acquire a lease of the given duration on a blob.
    ///
    /// A blob that is already leased yields [`BlobStoreError::LeaseConflict`].
    async fn acquire_lease(
        &self,
        container: &str,
        name: &str,
        duration: Duration,
    ) -> Result<LeaseId>;

    /// Extend the lease identified by `lease` for another full duration.
    async fn renew_lease(&self, container: &str, name: &str, lease: &LeaseId) -> Result<()>;

    /// Relinquish the lease identified by `lease`.
    ///
    /// A lease that has already expired or been released yields
    /// [`BlobStoreError::LeaseNotHeld`].
    async fn release_lease(&self, container: &str, name: &str, lease: &LeaseId) -> Result<()>;
}

/// A blob's listing-visible attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobInfo {
    /// Blob name, unique within its container.
    pub name: String,
    /// Content size in bytes, when the listing reports it.
    pub size: Option<u64>,
    /// Last-modified instant.
    pub last_modified: OffsetDateTime,
    /// Index tags prefetched by the listing, when the store supports that.
    /// `None` means the listing did not carry tags, not that the blob has
    /// none.
    pub tags: Option<BTreeMap<String, String>>,
}

/// Request to list one page of blobs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListBlobsRequest {
    /// Only return blobs whose name starts with this prefix.
    pub prefix: Option<String>,
    /// Maximum number of blobs in the page.
    pub page_size: Option<usize>,
    /// Continuation token from the previous page.
    pub page_token: Option<String>,
}

/// One page of a blob listing.
#[derive(Debug, Clone)]
pub struct ListBlobsResponse {
    /// The blobs in this page, in lexicographic name order.
    pub blobs: Vec<BlobInfo>,
    /// Continuation token for the next page, absent on the last page.
    pub next_page_token: Option<String>,
}

/// An open blob read: properties plus the chunked byte stream.
pub struct BlobDownload {
    /// The blob's properties at open time.
    pub info: BlobInfo,
    /// The blob's bytes. Chunk boundaries are arbitrary.
    pub stream: BoxStream<'static, Result<Bytes>>,
}

/// Opaque token identifying a held lease.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LeaseId(String);

impl LeaseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for BlobDownload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobDownload")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}
