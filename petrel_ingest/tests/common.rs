#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use petrel_blob_store::{BlobStore, InMemoryBlobStore};
use petrel_ingest::{BlobEvent, BlobPoller, EventSink, LineStreamer, PollerOptions};
use petrel_tracking::{LeaseConfig, StateTracker};

pub const STORAGE_ACCOUNT: &str = "acct";

pub fn lease_config() -> LeaseConfig {
    LeaseConfig::new(Duration::from_secs(15), Duration::from_secs(10))
}

/// A store with one container of three-line blobs.
pub async fn seeded_store(container: &str, names: &[&str]) -> Arc<InMemoryBlobStore> {
    let store = Arc::new(InMemoryBlobStore::new());
    store.create_container(container).await;
    for name in names {
        store
            .put_blob(container, name, "line1\nline2\nline3\n")
            .await
            .expect("put blob");
    }
    store
}

/// Event sink that records every delivered event.
#[derive(Default)]
pub struct CollectingSink(Mutex<Vec<BlobEvent>>);

impl CollectingSink {
    pub fn events(&self) -> Vec<BlobEvent> {
        self.0.lock().expect("sink lock").clone()
    }

    /// `(line_number, message)` pairs for one blob, in delivery order.
    pub fn lines_for(&self, blob: &str) -> Vec<(u64, String)> {
        self.events()
            .into_iter()
            .filter(|e| e.metadata.azure_blob_name == blob)
            .map(|e| (e.metadata.azure_blob_line_number, e.message))
            .collect()
    }
}

impl EventSink for CollectingSink {
    fn deliver(&self, event: BlobEvent) {
        self.0.lock().expect("sink lock").push(event);
    }
}

pub fn default_options() -> PollerOptions {
    PollerOptions {
        prefix: None,
        batch_size: 10,
        concurrency: 2,
    }
}

pub fn poller(
    store: Arc<InMemoryBlobStore>,
    tracker: Arc<dyn StateTracker>,
    sink: Arc<CollectingSink>,
    container: &str,
    options: PollerOptions,
) -> BlobPoller {
    BlobPoller::new(
        store as Arc<dyn BlobStore>,
        tracker,
        LineStreamer::new(STORAGE_ACCOUNT, container, true),
        sink,
        container,
        options,
    )
}
