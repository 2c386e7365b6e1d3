use petrel_blob_store::{BlobStoreError, ErrorKind};
use petrel_tracking::TrackerError;
use snafu::Snafu;

/// Errors that escape the streamer or a poll cycle.
///
/// Per-blob failures inside a cycle never surface here; they are translated
/// to `mark_failed` + `release` at the task boundary and reported in the
/// cycle summary. Listing and filtering failures do propagate, so the outer
/// loop can decide whether to keep running.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum IngestError {
    #[snafu(display("blob store operation failed: {operation}"))]
    BlobStore {
        operation: &'static str,
        source: BlobStoreError,
    },

    #[snafu(display("tracker operation failed: {operation}"))]
    Tracker {
        operation: &'static str,
        source: TrackerError,
    },

    #[snafu(display("failed to format blob timestamp"))]
    Timestamp { source: time::error::Format },
}

pub type Result<T, E = IngestError> = std::result::Result<T, E>;

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::BlobStore { source, .. } => source.kind(),
            Self::Tracker { source, .. } => source.kind(),
            Self::Timestamp { .. } => ErrorKind::Internal,
        }
    }
}
