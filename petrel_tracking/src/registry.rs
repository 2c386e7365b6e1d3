//! SQLite-backed state tracker for single-replica deployments.
//!
//! Processing state lives in a local database, so only read access to the
//! container is needed. Not safe with multiple replicas: each replica would
//! keep its own independent registry. No leases are involved.

use std::{path::Path, sync::Arc};

use petrel_blob_store::BlobInfo;
use snafu::ResultExt;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Row, SqlitePool,
};
use tracing::{debug, info};

use crate::{
    error::{RegistrySnafu, Result},
    now_rfc3339, StateTracker,
};

const CREATE_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS blobs (
    name TEXT PRIMARY KEY,
    status TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    error TEXT,
    processor TEXT
)";

const CREATE_INDEX_SQL: &str = "CREATE INDEX IF NOT EXISTS idx_status ON blobs(status)";

const SELECT_COMPLETED_SQL: &str = "SELECT name FROM blobs WHERE status = 'completed'";

const INSERT_CLAIM_SQL: &str = "INSERT INTO blobs (name, status, started_at, processor) \
     VALUES (?1, 'processing', ?2, ?3) ON CONFLICT(name) DO NOTHING";

const UPDATE_COMPLETED_SQL: &str = "UPDATE blobs SET status = 'completed', completed_at = ?1, \
     error = NULL, processor = ?2 WHERE name = ?3";

const UPDATE_FAILED_SQL: &str =
    "UPDATE blobs SET status = 'failed', error = ?1, processor = ?2 WHERE name = ?3";

const DELETE_PROCESSING_SQL: &str =
    "DELETE FROM blobs WHERE name = ?1 AND status = 'processing'";

const SELECT_RECORD_SQL: &str = "SELECT name, status, started_at, completed_at, error, processor \
     FROM blobs WHERE name = ?1";

/// One row of the registry, as recorded on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRecord {
    pub name: String,
    pub status: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
    pub error: Option<String>,
    pub processor: Option<String>,
}

pub struct RegistryStateTracker {
    pool: SqlitePool,
    processor: String,
}

impl RegistryStateTracker {
    /// Open (creating if missing) the registry database at `path`.
    pub async fn open(path: impl AsRef<Path>, processor: impl Into<String>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .context(RegistrySnafu {
                operation: "connect",
            })?;

        let tracker = Self::with_pool(pool, processor).await?;
        info!(path = %path.as_ref().display(), "registry state tracker initialized");
        Ok(tracker)
    }

    /// An ephemeral in-memory registry, for tests.
    pub async fn in_memory(processor: impl Into<String>) -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);
        // The database lives in its single connection; the pool must never
        // retire it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context(RegistrySnafu {
                operation: "connect",
            })?;

        Self::with_pool(pool, processor).await
    }

    async fn with_pool(pool: SqlitePool, processor: impl Into<String>) -> Result<Self> {
        for statement in [CREATE_TABLE_SQL, CREATE_INDEX_SQL] {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .context(RegistrySnafu {
                    operation: "init_schema",
                })?;
        }

        Ok(Self {
            pool,
            processor: processor.into(),
        })
    }

    /// The recorded row for a blob, if any.
    pub async fn lookup(&self, name: &str) -> Result<Option<BlobRecord>> {
        let row = sqlx::query(SELECT_RECORD_SQL)
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .context(RegistrySnafu { operation: "lookup" })?;

        Ok(row.map(|row| BlobRecord {
            name: row.get("name"),
            status: row.get("status"),
            started_at: row.get("started_at"),
            completed_at: row.get("completed_at"),
            error: row.get("error"),
            processor: row.get("processor"),
        }))
    }
}

#[async_trait::async_trait]
impl StateTracker for RegistryStateTracker {
    /// Exclude blobs recorded as completed; everything else, including
    /// failed and stale processing rows, stays eligible.
    async fn filter_candidates(&self, blobs: Vec<BlobInfo>) -> Result<Vec<BlobInfo>> {
        let completed: Vec<String> = sqlx::query_scalar(SELECT_COMPLETED_SQL)
            .fetch_all(&self.pool)
            .await
            .context(RegistrySnafu {
                operation: "select_completed",
            })?;
        let completed: std::collections::HashSet<String> = completed.into_iter().collect();

        Ok(blobs
            .into_iter()
            .filter(|blob| !completed.contains(&blob.name))
            .collect())
    }

    /// A single conditional insert: one row affected means the claim is
    /// ours, zero means a record already exists in some state.
    async fn claim(&self, name: &str) -> Result<bool> {
        let result = sqlx::query(INSERT_CLAIM_SQL)
            .bind(name)
            .bind(now_rfc3339())
            .bind(&self.processor)
            .execute(&self.pool)
            .await
            .context(RegistrySnafu { operation: "claim" })?;

        let claimed = result.rows_affected() == 1;
        debug!(blob = %name, claimed, "registry claim");
        Ok(claimed)
    }

    async fn mark_completed(&self, name: &str) -> Result<()> {
        sqlx::query(UPDATE_COMPLETED_SQL)
            .bind(now_rfc3339())
            .bind(&self.processor)
            .bind(name)
            .execute(&self.pool)
            .await
            .context(RegistrySnafu {
                operation: "mark_completed",
            })?;
        debug!(blob = %name, "marked blob completed");
        Ok(())
    }

    async fn mark_failed(&self, name: &str, reason: &str) -> Result<()> {
        sqlx::query(UPDATE_FAILED_SQL)
            .bind(reason)
            .bind(&self.processor)
            .bind(name)
            .execute(&self.pool)
            .await
            .context(RegistrySnafu {
                operation: "mark_failed",
            })?;
        debug!(blob = %name, reason, "marked blob failed");
        Ok(())
    }

    /// Delete the row only while it is still `processing`, so the blob is
    /// rediscovered next cycle; terminal rows survive.
    async fn release(&self, name: &str) -> Result<()> {
        sqlx::query(DELETE_PROCESSING_SQL)
            .bind(name)
            .execute(&self.pool)
            .await
            .context(RegistrySnafu {
                operation: "release",
            })?;
        Ok(())
    }

    /// The registry strategy takes no leases, so a claim can never be
    /// compromised.
    fn was_lease_renewal_compromised(&self, _name: &str) -> bool {
        false
    }

    async fn close(&self) {
        self.pool.close().await;
        info!("registry state tracker closed");
    }
}
