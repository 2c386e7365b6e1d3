//! Poll-cycle orchestration.
//!
//! A cycle runs in two phases. Discovery iterates the container listing page
//! by page, filters each page through the tracker, and claims candidates
//! sequentially until the batch is full, the listing is exhausted, or
//! cancellation is observed. Processing then fans the claimed names out over
//! a bounded pool of workers; every worker streams its blob, records the
//! terminal outcome, and always releases the claim.

use std::{sync::Arc, time::Instant};

use futures::{stream, StreamExt};
use petrel_blob_store::{BlobStore, ListBlobsRequest};
use petrel_tracking::StateTracker;
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    error::{BlobStoreSnafu, Result, TrackerSnafu},
    event::EventSink,
    streamer::LineStreamer,
};

const LISTING_PAGE_SIZE: usize = 5_000;

/// Knobs of a poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerOptions {
    /// Only consider blobs whose name starts with this prefix.
    pub prefix: Option<String>,
    /// Maximum number of blobs claimed (and processed) per cycle.
    pub batch_size: usize,
    /// Number of blobs processed in parallel.
    pub concurrency: usize,
}

/// Summary of one poll cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    /// Blobs streamed to completion and marked completed.
    pub blobs_processed: usize,
    /// Blobs marked failed, for any reason.
    pub blobs_failed: usize,
    /// Candidates whose claim was refused (another worker holds them).
    pub blobs_skipped: usize,
    /// Events delivered to the sink across all blobs of the cycle.
    pub events_produced: u64,
    /// Wall-clock duration of the cycle.
    pub duration_ms: u64,
}

struct BlobOutcome {
    success: bool,
    events: u64,
}

/// Executes poll cycles against one container. The caller invokes
/// [`poll_once`](BlobPoller::poll_once) in a loop and sleeps between cycles.
pub struct BlobPoller {
    store: Arc<dyn BlobStore>,
    tracker: Arc<dyn StateTracker>,
    streamer: LineStreamer,
    sink: Arc<dyn EventSink>,
    container: String,
    options: PollerOptions,
}

impl BlobPoller {
    pub fn new(
        store: Arc<dyn BlobStore>,
        tracker: Arc<dyn StateTracker>,
        streamer: LineStreamer,
        sink: Arc<dyn EventSink>,
        container: impl Into<String>,
        options: PollerOptions,
    ) -> Self {
        Self {
            store,
            tracker,
            streamer,
            sink,
            container: container.into(),
            options,
        }
    }

    /// Run one cycle: list, filter, claim, process, mark, release.
    ///
    /// Listing and filtering errors propagate; every per-blob failure is
    /// recorded in the summary instead.
    pub async fn poll_once(&self, ct: &CancellationToken) -> Result<CycleSummary> {
        let started = Instant::now();

        let (claimed, blobs_skipped) = self.discover(ct).await?;

        if claimed.is_empty() {
            return Ok(CycleSummary {
                blobs_skipped,
                duration_ms: started.elapsed().as_millis() as u64,
                ..Default::default()
            });
        }

        let outcomes: Vec<BlobOutcome> = stream::iter(claimed)
            .map(|name| self.process_blob(name, ct))
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;

        let mut summary = CycleSummary {
            blobs_skipped,
            ..Default::default()
        };
        for outcome in outcomes {
            if outcome.success {
                summary.blobs_processed += 1;
            } else {
                summary.blobs_failed += 1;
            }
            summary.events_produced += outcome.events;
        }
        summary.duration_ms = started.elapsed().as_millis() as u64;

        debug!(
            processed = summary.blobs_processed,
            failed = summary.blobs_failed,
            skipped = summary.blobs_skipped,
            events = summary.events_produced,
            duration_ms = summary.duration_ms,
            "poll cycle complete"
        );
        Ok(summary)
    }

    /// Phase 1: page the listing in the store's natural order, filter, and
    /// claim sequentially so two workers of this replica never race for the
    /// same blob.
    async fn discover(&self, ct: &CancellationToken) -> Result<(Vec<String>, usize)> {
        let mut claimed = Vec::new();
        let mut skipped = 0;
        let mut page_token = None;

        'discovery: loop {
            if claimed.len() >= self.options.batch_size || ct.is_cancelled() {
                break;
            }

            let page = self
                .store
                .list_blobs(
                    &self.container,
                    ListBlobsRequest {
                        prefix: self.options.prefix.clone(),
                        page_size: Some(LISTING_PAGE_SIZE),
                        page_token: page_token.take(),
                    },
                )
                .await
                .context(BlobStoreSnafu {
                    operation: "list_blobs",
                })?;

            let listed = page.blobs.len();
            let candidates = self
                .tracker
                .filter_candidates(page.blobs)
                .await
                .context(TrackerSnafu {
                    operation: "filter_candidates",
                })?;
            debug!(
                listed,
                candidates = candidates.len(),
                "filtered listing page"
            );

            for candidate in candidates {
                if claimed.len() >= self.options.batch_size || ct.is_cancelled() {
                    break 'discovery;
                }

                let taken = self
                    .tracker
                    .claim(&candidate.name)
                    .await
                    .context(TrackerSnafu { operation: "claim" })?;
                if taken {
                    claimed.push(candidate.name);
                } else {
                    debug!(blob = %candidate.name, "could not claim blob, skipping");
                    skipped += 1;
                }
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok((claimed, skipped))
    }

    /// Phase 2, one worker: stream the blob, record the outcome, and release
    /// the claim no matter which path was taken.
    async fn process_blob(&self, name: String, ct: &CancellationToken) -> BlobOutcome {
        let outcome = match self.stream_and_mark(&name, ct).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(blob = %name, err = ?err, "failed to process blob");
                self.mark_failed_quietly(&name, &err.to_string()).await;
                BlobOutcome {
                    success: false,
                    events: 0,
                }
            }
        };

        if let Err(err) = self.tracker.release(&name).await {
            warn!(blob = %name, err = ?err, "failed to release claim");
        }
        outcome
    }

    async fn stream_and_mark(&self, name: &str, ct: &CancellationToken) -> Result<BlobOutcome> {
        let download = self
            .store
            .read_blob(&self.container, name)
            .await
            .context(BlobStoreSnafu {
                operation: "read_blob",
            })?;

        let result = self.streamer.stream(download, self.sink.as_ref(), ct).await?;

        if !result.completed {
            self.tracker
                .mark_failed(name, "interrupted")
                .await
                .context(TrackerSnafu {
                    operation: "mark_failed",
                })?;
            return Ok(BlobOutcome {
                success: false,
                events: result.events,
            });
        }

        if self.tracker.was_lease_renewal_compromised(name) {
            warn!(blob = %name, "lease renewal failed during processing, marking blob failed");
            self.tracker
                .mark_failed(name, "lease renewal failed during processing")
                .await
                .context(TrackerSnafu {
                    operation: "mark_failed",
                })?;
            return Ok(BlobOutcome {
                success: false,
                events: result.events,
            });
        }

        self.tracker
            .mark_completed(name)
            .await
            .context(TrackerSnafu {
                operation: "mark_completed",
            })?;
        Ok(BlobOutcome {
            success: true,
            events: result.events,
        })
    }

    async fn mark_failed_quietly(&self, name: &str, reason: &str) {
        if let Err(err) = self.tracker.mark_failed(name, reason).await {
            warn!(blob = %name, err = ?err, "failed to mark blob failed");
        }
    }
}
