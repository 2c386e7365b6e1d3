use petrel_blob_store::{BlobStoreError, ErrorKind};
use snafu::Snafu;

/// Errors surfaced by state trackers and the lease manager.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum TrackerError {
    #[snafu(display("blob store operation failed: {operation}"))]
    BlobStore {
        operation: &'static str,
        source: BlobStoreError,
    },

    #[snafu(display("registry operation failed: {operation}"))]
    Registry {
        operation: &'static str,
        source: sqlx::Error,
    },

    /// A terminal mark was attempted without a held lease. The claim/release
    /// protocol guarantees a lease at this point, so reaching this is a bug
    /// in the caller.
    #[snafu(display("no lease held for blob '{name}' during terminal mark"))]
    MissingLease { name: String },

    #[snafu(display("unknown tracking strategy '{value}'"))]
    UnknownStrategy { value: String },
}

pub type Result<T, E = TrackerError> = std::result::Result<T, E>;

impl TrackerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BlobStore { source, .. } => source.kind(),
            Self::Registry { .. } => ErrorKind::Temporary,
            Self::MissingLease { .. } => ErrorKind::Internal,
            Self::UnknownStrategy { .. } => ErrorKind::Configuration,
        }
    }
}
