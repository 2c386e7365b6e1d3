use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Args;
use petrel_blob_store::{BlobStore, InMemoryBlobStore};
use petrel_ingest::{BlobEvent, BlobPoller, EventSink, LineStreamer, PollerOptions};
use petrel_tracking::{
    ContainerStateTracker, LeaseConfig, RegistryStateTracker, StateTracker, TagStateTracker,
    TrackingStrategy,
};
use snafu::ResultExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    config,
    error::{PollSnafu, ReadSeedSnafu, RegistrySnafu, Result, SeedSnafu},
};

const DEFAULT_ARCHIVE_CONTAINER: &str = "archive";
const DEFAULT_ERROR_CONTAINER: &str = "errors";

/// Built-in sample data used when no seed files are given.
const SAMPLE_BLOBS: &[(&str, &str)] = &[
    (
        "2024/05/01/frontend.log",
        "accepted connection from 10.0.0.7\nGET /healthz 200 1ms\nGET /api/orders 200 12ms\n",
    ),
    (
        "2024/05/01/worker.log",
        "picked up job 4411\njob 4411 finished in 340ms\n",
    ),
    (
        "2024/05/02/frontend.log",
        "accepted connection from 10.0.0.9\nPOST /api/orders 201 23ms\n",
    ),
];

#[derive(Debug, Args)]
pub struct DevArgs {
    /// Container to poll for blobs
    #[arg(long, default_value = "logs")]
    pub container: String,
    /// Storage account name recorded in event metadata
    #[arg(long, default_value = "devstore")]
    pub storage_account: String,
    /// Tracking strategy: tags, container, or registry
    #[arg(long, default_value = "tags")]
    pub tracking_strategy: String,
    /// Only process blobs whose name starts with this prefix
    #[arg(long)]
    pub prefix: Option<String>,
    /// Maximum number of blobs to process per poll cycle
    #[arg(long, default_value_t = 10)]
    pub blob_batch_size: usize,
    /// Number of blobs to process in parallel within a poll cycle
    #[arg(long, default_value_t = 1)]
    pub concurrency: usize,
    /// Seconds to sleep between poll cycles
    #[arg(long, default_value_t = 5)]
    pub poll_interval: u64,
    /// Lease duration in seconds (15-60)
    #[arg(long, default_value_t = 30)]
    pub lease_duration: u64,
    /// Lease renewal interval in seconds, less than the lease duration
    #[arg(long, default_value_t = 20)]
    pub lease_renewal: u64,
    /// Whether blank lines produce events
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub skip_empty_lines: bool,
    /// Identifier recorded as the processor of each blob; defaults to the
    /// hostname
    #[arg(long)]
    pub processor_id: Option<String>,
    /// Container completed blobs are moved to (container strategy)
    #[arg(long)]
    pub archive_container: Option<String>,
    /// Container failed blobs are moved to (container strategy)
    #[arg(long)]
    pub error_container: Option<String>,
    /// Path of the registry database (registry strategy); in-memory when
    /// omitted
    #[arg(long)]
    pub registry_path: Option<PathBuf>,
    /// Files uploaded as blobs before polling starts, named by file name
    #[arg(long)]
    pub seed: Vec<PathBuf>,
    /// Stop after this many cycles instead of looping until ctrl-c
    #[arg(long)]
    pub cycles: Option<usize>,
}

impl DevArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        let (strategy, warnings) = config::validate(&self)?;
        for warning in warnings {
            warn!("{warning}");
        }

        let processor = self
            .processor_id
            .clone()
            .unwrap_or_else(default_processor_id);
        info!(
            strategy = %strategy,
            processor = %processor,
            container = %self.container,
            "starting petrel in development mode"
        );

        let store = Arc::new(InMemoryBlobStore::new());
        store.create_container(&self.container).await;
        self.seed_blobs(&store).await?;

        let tracker = self.build_tracker(&store, strategy, &processor).await?;

        let sink: Arc<dyn EventSink> = Arc::new(|event: BlobEvent| match serde_json::to_string(
            &event,
        ) {
            Ok(line) => println!("{line}"),
            Err(err) => warn!(err = ?err, "failed to serialize event"),
        });

        let poller = BlobPoller::new(
            Arc::clone(&store) as Arc<dyn BlobStore>,
            Arc::clone(&tracker),
            LineStreamer::new(
                self.storage_account.clone(),
                self.container.clone(),
                self.skip_empty_lines,
            ),
            sink,
            self.container.clone(),
            PollerOptions {
                prefix: self.prefix.clone(),
                batch_size: self.blob_batch_size,
                concurrency: self.concurrency,
            },
        );

        let poll_interval = Duration::from_secs(self.poll_interval);
        let mut completed_cycles = 0;

        while !ct.is_cancelled() {
            let summary = poller.poll_once(&ct).await.context(PollSnafu)?;
            info!(
                processed = summary.blobs_processed,
                failed = summary.blobs_failed,
                skipped = summary.blobs_skipped,
                events = summary.events_produced,
                duration_ms = summary.duration_ms,
                "poll cycle complete"
            );

            completed_cycles += 1;
            if let Some(limit) = self.cycles {
                if completed_cycles >= limit {
                    break;
                }
            }

            tokio::select! {
                _ = ct.cancelled() => break,
                _ = tokio::time::sleep(poll_interval) => {}
            }
        }

        tracker.close().await;
        Ok(())
    }

    async fn seed_blobs(&self, store: &Arc<InMemoryBlobStore>) -> Result<()> {
        if self.seed.is_empty() {
            for (name, content) in SAMPLE_BLOBS {
                store
                    .put_blob(&self.container, name, *content)
                    .await
                    .context(SeedSnafu)?;
            }
            info!(blobs = SAMPLE_BLOBS.len(), "seeded built-in sample blobs");
            return Ok(());
        }

        for path in &self.seed {
            let content = std::fs::read(path).context(ReadSeedSnafu { path })?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            store
                .put_blob(&self.container, &name, content)
                .await
                .context(SeedSnafu)?;
        }
        info!(blobs = self.seed.len(), "seeded blobs from files");
        Ok(())
    }

    async fn build_tracker(
        &self,
        store: &Arc<InMemoryBlobStore>,
        strategy: TrackingStrategy,
        processor: &str,
    ) -> Result<Arc<dyn StateTracker>> {
        let lease_config = LeaseConfig::new(
            Duration::from_secs(self.lease_duration),
            Duration::from_secs(self.lease_renewal),
        );

        let tracker: Arc<dyn StateTracker> = match strategy {
            TrackingStrategy::Tags => Arc::new(TagStateTracker::new(
                Arc::clone(store) as Arc<dyn BlobStore>,
                self.container.clone(),
                processor,
                lease_config,
            )),
            TrackingStrategy::Container => {
                let archive = self
                    .archive_container
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ARCHIVE_CONTAINER.to_string());
                let errors = self
                    .error_container
                    .clone()
                    .unwrap_or_else(|| DEFAULT_ERROR_CONTAINER.to_string());
                store.create_container(&archive).await;
                store.create_container(&errors).await;

                Arc::new(ContainerStateTracker::new(
                    Arc::clone(store) as Arc<dyn BlobStore>,
                    self.container.clone(),
                    archive,
                    errors,
                    processor,
                    lease_config,
                ))
            }
            TrackingStrategy::Registry => {
                let tracker = match &self.registry_path {
                    Some(path) => RegistryStateTracker::open(path, processor)
                        .await
                        .context(RegistrySnafu)?,
                    None => RegistryStateTracker::in_memory(processor)
                        .await
                        .context(RegistrySnafu)?,
                };
                Arc::new(tracker)
            }
        };
        Ok(tracker)
    }
}

fn default_processor_id() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "petrel-dev".to_string())
}
