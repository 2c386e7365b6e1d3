//! Blob processing-state tracking.
//!
//! Three interchangeable trackers decide which blobs are candidates for a
//! poll cycle, claim exclusive ownership of one, record terminal outcomes,
//! and release claims:
//!
//! - [`TagStateTracker`]: state lives in blob index tags; multi-replica
//!   safe; needs tag-write permission.
//! - [`ContainerStateTracker`]: state is the container a blob resides in
//!   (incoming/archive/errors); multi-replica safe; needs copy+delete
//!   permission.
//! - [`RegistryStateTracker`]: state lives in a local SQLite database;
//!   single replica only; needs read permission only.

mod container;
mod error;
mod lease;
mod registry;
pub mod tags;

use std::str::FromStr;

use async_trait::async_trait;
use petrel_blob_store::BlobInfo;
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

pub use self::container::ContainerStateTracker;
pub use self::error::{Result, TrackerError};
pub use self::lease::{LeaseConfig, LeaseManager};
pub use self::registry::{BlobRecord, RegistryStateTracker};
pub use self::tags::TagStateTracker;

/// Capability set the poll orchestrator consumes from a tracker.
///
/// Every successful [`claim`](StateTracker::claim) must be followed by
/// exactly one [`release`](StateTracker::release) on every control-flow
/// path; terminal marks happen between the two.
#[async_trait]
pub trait StateTracker: Send + Sync {
    /// Return the subset of `blobs` eligible for processing this cycle.
    /// Previously failed blobs are always eligible again.
    async fn filter_candidates(&self, blobs: Vec<BlobInfo>) -> Result<Vec<BlobInfo>>;

    /// Attempt exclusive ownership of a blob. `false` means another worker
    /// holds it; unrecoverable errors propagate.
    async fn claim(&self, name: &str) -> Result<bool>;

    /// Record a held claim as successfully completed.
    async fn mark_completed(&self, name: &str) -> Result<()>;

    /// Record a held claim as failed with a short reason. Failed blobs are
    /// candidates again on a later cycle.
    async fn mark_failed(&self, name: &str, reason: &str) -> Result<()>;

    /// Relinquish a claim without changing terminal state.
    async fn release(&self, name: &str) -> Result<()>;

    /// Read-and-clear flag set when the blob's lease renewal failed during
    /// processing. Consulted right before `mark_completed` so a compromised
    /// success is demoted to a failure.
    fn was_lease_renewal_compromised(&self, name: &str) -> bool;

    /// Release every still-held claim. Per-claim errors are logged and
    /// swallowed so shutdown always completes.
    async fn close(&self);
}

/// Which tracker implementation a deployment runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingStrategy {
    Tags,
    Container,
    Registry,
}

impl TrackingStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tags => "tags",
            Self::Container => "container",
            Self::Registry => "registry",
        }
    }
}

impl FromStr for TrackingStrategy {
    type Err = TrackerError;

    fn from_str(value: &str) -> Result<Self> {
        match value {
            "tags" => Ok(Self::Tags),
            "container" => Ok(Self::Container),
            "registry" => Ok(Self::Registry),
            _ => error::UnknownStrategySnafu { value }.fail(),
        }
    }
}

impl std::fmt::Display for TrackingStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The current instant as an ISO-8601 (RFC 3339) string, the format every
/// tracker records timestamps in.
pub(crate) fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"))
}
