//! Blob-to-event ingestion: the line streamer and the poll orchestrator.
//!
//! The [`LineStreamer`] turns one blob's byte stream into events with
//! per-line provenance; the [`BlobPoller`] runs whole poll cycles (discover,
//! filter, claim, process in parallel, mark, release) against a
//! [`BlobStore`](petrel_blob_store::BlobStore) and a
//! [`StateTracker`](petrel_tracking::StateTracker).

mod error;
mod event;
mod poller;
mod streamer;

pub use self::error::{IngestError, Result};
pub use self::event::{BlobEvent, EventMetadata, EventSink};
pub use self::poller::{BlobPoller, CycleSummary, PollerOptions};
pub use self::streamer::{LineStreamer, StreamOutcome};
