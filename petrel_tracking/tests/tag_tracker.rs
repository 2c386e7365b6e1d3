use std::{collections::BTreeMap, sync::Arc, time::Duration};

use petrel_blob_store::{BlobInfo, BlobStore, InMemoryBlobStore};
use petrel_tracking::{
    tags::{
        MAX_ERROR_LENGTH, STATUS_COMPLETED, STATUS_FAILED, STATUS_PROCESSING, TAG_COMPLETED,
        TAG_ERROR, TAG_PROCESSOR, TAG_STARTED, TAG_STATUS,
    },
    StateTracker, TagStateTracker,
};

mod common;

use common::{lease_config, list_all, seeded_store};

fn tracker(store: &Arc<InMemoryBlobStore>) -> TagStateTracker {
    TagStateTracker::new(
        Arc::clone(store) as Arc<dyn BlobStore>,
        "logs",
        "replica-1",
        lease_config(),
    )
}

async fn set_status(store: &Arc<InMemoryBlobStore>, name: &str, status: &str) {
    let mut tags = store.get_tags("logs", name).await.expect("get tags");
    tags.insert(TAG_STATUS.to_string(), status.to_string());
    store
        .set_tags("logs", name, tags, None)
        .await
        .expect("set tags");
}

#[tokio::test]
async fn claim_merges_reserved_tags_over_user_tags() {
    let store = Arc::new(InMemoryBlobStore::new());
    store.create_container("logs").await;

    let user_tags: BTreeMap<String, String> = (1..=5)
        .map(|i| (format!("team_tag_{i}"), format!("value-{i}")))
        .collect();
    store
        .put_blob_with_tags("logs", "a.log", "one\n", user_tags.clone())
        .await
        .expect("put blob");

    let tracker = tracker(&store);
    assert!(tracker.claim("a.log").await.expect("claim"));

    let tags = store.get_tags("logs", "a.log").await.expect("tags");
    assert_eq!(tags.get(TAG_STATUS).map(String::as_str), Some(STATUS_PROCESSING));
    assert_eq!(tags.get(TAG_PROCESSOR).map(String::as_str), Some("replica-1"));
    assert!(tags.contains_key(TAG_STARTED));
    for (key, value) in &user_tags {
        assert_eq!(tags.get(key), Some(value));
    }
    assert!(tags.len() <= 10);

    tracker.mark_completed("a.log").await.expect("mark completed");
    tracker.release("a.log").await.expect("release");

    let tags = store.get_tags("logs", "a.log").await.expect("tags");
    assert_eq!(tags.get(TAG_STATUS).map(String::as_str), Some(STATUS_COMPLETED));
    assert!(tags.contains_key(TAG_COMPLETED));
    assert!(!tags.contains_key(TAG_STARTED));
    assert!(!tags.contains_key(TAG_ERROR));
    for (key, value) in &user_tags {
        assert_eq!(tags.get(key), Some(value));
    }
    assert!(tags.len() <= 10);
}

#[tokio::test]
async fn claim_returns_false_when_blob_is_leased() {
    let store = seeded_store("logs", &["a.log"]).await;
    let _held = store
        .acquire_lease("logs", "a.log", Duration::from_secs(30))
        .await
        .expect("external lease");

    let tracker = tracker(&store);
    assert!(!tracker.claim("a.log").await.expect("claim"));
}

#[tokio::test]
async fn filter_admits_only_new_and_failed_blobs() {
    let store = seeded_store("logs", &["failed.log", "finished.log", "fresh.log", "held.log"]).await;
    set_status(&store, "failed.log", STATUS_FAILED).await;
    set_status(&store, "finished.log", STATUS_COMPLETED).await;
    set_status(&store, "held.log", STATUS_PROCESSING).await;

    let tracker = tracker(&store);
    let candidates = tracker
        .filter_candidates(list_all(&store, "logs").await)
        .await
        .expect("filter");

    let names: Vec<_> = candidates.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["failed.log", "fresh.log"]);
}

#[tokio::test]
async fn filter_falls_back_to_tag_reads_when_listing_has_none() {
    let store = seeded_store("logs", &["done.log", "new.log"]).await;
    set_status(&store, "done.log", STATUS_COMPLETED).await;

    // Strip the prefetched tags so the tracker must read them per blob.
    let listed: Vec<BlobInfo> = list_all(&store, "logs")
        .await
        .into_iter()
        .map(|blob| BlobInfo { tags: None, ..blob })
        .collect();

    let tracker = tracker(&store);
    let candidates = tracker.filter_candidates(listed).await.expect("filter");

    let names: Vec<_> = candidates.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["new.log"]);
}

#[tokio::test]
async fn mark_failed_sanitizes_and_truncates_the_reason() {
    let store = seeded_store("logs", &["a.log"]).await;
    let tracker = tracker(&store);
    assert!(tracker.claim("a.log").await.expect("claim"));

    let noisy = format!("read failed: {}\n@stage#2!", "x".repeat(300));
    tracker
        .mark_failed("a.log", &noisy)
        .await
        .expect("mark failed");
    tracker.release("a.log").await.expect("release");

    let tags = store.get_tags("logs", "a.log").await.expect("tags");
    assert_eq!(tags.get(TAG_STATUS).map(String::as_str), Some(STATUS_FAILED));

    let error = tags.get(TAG_ERROR).expect("error tag");
    assert_eq!(error.len(), MAX_ERROR_LENGTH);
    assert!(error
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || " +-./:=_".contains(c)));
}

#[tokio::test]
async fn close_releases_every_held_lease() {
    let store = seeded_store("logs", &["a.log", "b.log"]).await;
    let tracker = tracker(&store);
    assert!(tracker.claim("a.log").await.expect("claim a"));
    assert!(tracker.claim("b.log").await.expect("claim b"));

    tracker.close().await;

    for name in ["a.log", "b.log"] {
        store
            .acquire_lease("logs", name, Duration::from_secs(15))
            .await
            .expect("lease available after close");
    }
}
