use petrel_tracking::{RegistryStateTracker, StateTracker};

mod common;

use common::{list_all, seeded_store};

#[tokio::test]
async fn claim_inserts_exactly_once_per_name() {
    let tracker = RegistryStateTracker::in_memory("replica-1")
        .await
        .expect("open registry");

    assert!(tracker.claim("a.log").await.expect("first claim"));
    assert!(!tracker.claim("a.log").await.expect("second claim"));

    let record = tracker
        .lookup("a.log")
        .await
        .expect("lookup")
        .expect("record exists");
    assert_eq!(record.status, "processing");
    assert_eq!(record.processor.as_deref(), Some("replica-1"));
    assert!(record.started_at.is_some());
}

#[tokio::test]
async fn filter_excludes_only_completed_blobs() {
    let store = seeded_store("logs", &["done.log", "failed.log", "new.log", "stale.log"]).await;
    let tracker = RegistryStateTracker::in_memory("replica-1")
        .await
        .expect("open registry");

    assert!(tracker.claim("done.log").await.expect("claim"));
    tracker.mark_completed("done.log").await.expect("complete");

    assert!(tracker.claim("failed.log").await.expect("claim"));
    tracker
        .mark_failed("failed.log", "checksum mismatch")
        .await
        .expect("fail");

    // A processing row left over from a crash stays eligible.
    assert!(tracker.claim("stale.log").await.expect("claim"));

    let candidates = tracker
        .filter_candidates(list_all(&store, "logs").await)
        .await
        .expect("filter");
    let names: Vec<_> = candidates.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["failed.log", "new.log", "stale.log"]);
}

#[tokio::test]
async fn release_deletes_only_processing_rows() {
    let tracker = RegistryStateTracker::in_memory("replica-1")
        .await
        .expect("open registry");

    // A processing row from an interrupted run is released and reclaimable.
    assert!(tracker.claim("y.log").await.expect("claim"));
    tracker.release("y.log").await.expect("release");
    assert!(tracker.lookup("y.log").await.expect("lookup").is_none());
    assert!(tracker.claim("y.log").await.expect("reclaim"));

    // Terminal rows survive release.
    tracker.mark_completed("y.log").await.expect("complete");
    tracker.release("y.log").await.expect("release terminal");
    let record = tracker
        .lookup("y.log")
        .await
        .expect("lookup")
        .expect("terminal row kept");
    assert_eq!(record.status, "completed");
    assert!(record.completed_at.is_some());
    assert!(record.error.is_none());
}

#[tokio::test]
async fn mark_failed_records_the_reason() {
    let tracker = RegistryStateTracker::in_memory("replica-1")
        .await
        .expect("open registry");

    assert!(tracker.claim("a.log").await.expect("claim"));
    tracker
        .mark_failed("a.log", "read timed out")
        .await
        .expect("fail");
    tracker.release("a.log").await.expect("release");

    let record = tracker
        .lookup("a.log")
        .await
        .expect("lookup")
        .expect("record exists");
    assert_eq!(record.status, "failed");
    assert_eq!(record.error.as_deref(), Some("read timed out"));
    assert!(record.completed_at.is_none());

    // A failed record blocks a fresh insert; the row itself carries the
    // retry state.
    assert!(!tracker.claim("a.log").await.expect("claim over failed row"));
}

#[tokio::test]
async fn registry_file_persists_across_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("registry.db");

    {
        let tracker = RegistryStateTracker::open(&path, "replica-1")
            .await
            .expect("open registry");
        assert!(tracker.claim("a.log").await.expect("claim"));
        tracker.mark_completed("a.log").await.expect("complete");
        tracker.close().await;
    }

    let tracker = RegistryStateTracker::open(&path, "replica-1")
        .await
        .expect("reopen registry");
    let record = tracker
        .lookup("a.log")
        .await
        .expect("lookup")
        .expect("record persisted");
    assert_eq!(record.status, "completed");

    assert!(!tracker.claim("a.log").await.expect("claim completed blob"));

    let store = seeded_store("logs", &["a.log", "b.log"]).await;
    let candidates = tracker
        .filter_candidates(list_all(&store, "logs").await)
        .await
        .expect("filter");
    let names: Vec<_> = candidates.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["b.log"]);
}

#[tokio::test]
async fn was_lease_renewal_compromised_is_always_false() {
    let tracker = RegistryStateTracker::in_memory("replica-1")
        .await
        .expect("open registry");
    assert!(tracker.claim("a.log").await.expect("claim"));
    assert!(!tracker.was_lease_renewal_compromised("a.log"));
}
