use snafu::Snafu;

use crate::ErrorKind;

/// Errors surfaced by blob-store operations.
///
/// The variants mirror the distinguishable reply classes of the underlying
/// store so that callers can branch on outcome (conflict, precondition,
/// missing resource) without inspecting store-specific payloads.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum BlobStoreError {
    #[snafu(display("container not found: {container}"))]
    ContainerNotFound { container: String },

    #[snafu(display("blob not found: {container}/{name}"))]
    BlobNotFound { container: String, name: String },

    /// Another holder owns the blob's lease.
    #[snafu(display("lease conflict on {container}/{name}"))]
    LeaseConflict { container: String, name: String },

    /// The supplied token does not correspond to a live lease.
    #[snafu(display("lease not held on {container}/{name}"))]
    LeaseNotHeld { container: String, name: String },

    /// A conditional write was rejected because the lease condition did not
    /// match the blob's current lease state.
    #[snafu(display("precondition failed on {container}/{name}: {message}"))]
    PreconditionFailed {
        container: String,
        name: String,
        message: String,
    },

    #[snafu(display(
        "tag limit exceeded on {container}/{name}: {count} tags, limit {limit}"
    ))]
    TagLimit {
        container: String,
        name: String,
        count: usize,
        limit: usize,
    },

    #[snafu(display("I/O error on {container}/{name}: {message}"))]
    Io {
        container: String,
        name: String,
        message: String,
    },
}

pub type Result<T, E = BlobStoreError> = std::result::Result<T, E>;

impl BlobStoreError {
    /// Whether this is the lease-taken reply of `acquire_lease`.
    pub fn is_lease_conflict(&self) -> bool {
        matches!(self, Self::LeaseConflict { .. })
    }

    /// Whether this is the lease-already-gone reply of `release_lease`.
    pub fn is_lease_not_held(&self) -> bool {
        matches!(self, Self::LeaseNotHeld { .. })
    }

    /// Whether this is a rejected conditional write.
    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, Self::PreconditionFailed { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ContainerNotFound { .. } | Self::BlobNotFound { .. }
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ContainerNotFound { .. } | Self::BlobNotFound { .. } => ErrorKind::NotFound,
            Self::LeaseConflict { .. } | Self::PreconditionFailed { .. } => ErrorKind::Conflict,
            Self::LeaseNotHeld { .. } => ErrorKind::Conflict,
            Self::TagLimit { .. } => ErrorKind::Validation,
            Self::Io { .. } => ErrorKind::Temporary,
        }
    }
}
