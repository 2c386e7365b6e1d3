use serde::{Deserialize, Serialize};

/// One event produced from one line of a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobEvent {
    /// The line text, delimiter stripped.
    pub message: String,
    /// Provenance of the line.
    #[serde(rename = "@metadata")]
    pub metadata: EventMetadata,
}

/// Per-line provenance carried under the event's `@metadata` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    pub azure_blob_name: String,
    pub azure_blob_container: String,
    pub azure_blob_storage_account: String,
    /// 1-based position of the line within its blob.
    pub azure_blob_line_number: u64,
    /// The blob's last-modified instant, ISO-8601.
    pub azure_blob_last_modified: String,
}

/// Downstream consumer of events.
///
/// Invoked concurrently from every processing worker; implementations must
/// tolerate that without further synchronisation from the caller. The sink
/// is assumed to accept every event (no back-pressure).
pub trait EventSink: Send + Sync {
    fn deliver(&self, event: BlobEvent);
}

impl<F> EventSink for F
where
    F: Fn(BlobEvent) + Send + Sync,
{
    fn deliver(&self, event: BlobEvent) {
        self(event)
    }
}
