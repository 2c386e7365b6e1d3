use std::path::PathBuf;

use petrel_blob_store::{BlobStoreError, ErrorKind};
use petrel_ingest::IngestError;
use petrel_tracking::TrackerError;
use snafu::Snafu;

/// CLI error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CliError {
    #[snafu(display("invalid configuration: {message}"))]
    InvalidConfiguration { message: String },

    #[snafu(display("failed to read seed file {path:?}"))]
    ReadSeed {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("failed to seed the development store"))]
    Seed { source: BlobStoreError },

    #[snafu(display("failed to open the registry"))]
    Registry { source: TrackerError },

    #[snafu(display("poll cycle failed"))]
    Poll { source: IngestError },
}

pub type Result<T, E = CliError> = std::result::Result<T, E>;

impl CliError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidConfiguration { .. } => ErrorKind::Configuration,
            Self::ReadSeed { .. } => ErrorKind::NotFound,
            Self::Seed { source } => source.kind(),
            Self::Registry { source } => source.kind(),
            Self::Poll { source } => source.kind(),
        }
    }
}
