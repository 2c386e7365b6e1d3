#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use petrel_blob_store::{BlobInfo, BlobStore, InMemoryBlobStore, ListBlobsRequest};
use petrel_tracking::LeaseConfig;

pub fn lease_config() -> LeaseConfig {
    LeaseConfig::new(Duration::from_secs(15), Duration::from_secs(10))
}

/// A store with one container seeded with the given blobs.
pub async fn seeded_store(container: &str, names: &[&str]) -> Arc<InMemoryBlobStore> {
    let store = Arc::new(InMemoryBlobStore::new());
    store.create_container(container).await;
    for name in names {
        store
            .put_blob(container, name, format!("{name} line\n"))
            .await
            .expect("put blob");
    }
    store
}

pub async fn list_all(store: &Arc<InMemoryBlobStore>, container: &str) -> Vec<BlobInfo> {
    store
        .list_blobs(container, ListBlobsRequest::default())
        .await
        .expect("list blobs")
        .blobs
}
