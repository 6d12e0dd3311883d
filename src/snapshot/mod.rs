//! Store snapshot loading.
//!
//! A snapshot is the full read-only content the query engine serves: papers,
//! entities and relationships. The `SnapshotProvider` trait abstracts where
//! it comes from so binaries and tests can load from files or inline data.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::models::{Entity, Paper, Relationship};
use crate::storage::memory::InMemoryStore;
use crate::storage::{StorageError, StorageResult};

pub mod json;

/// Errors that can occur while loading a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Failed to read from the data source
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the data format
    #[error("Parse error: {0}")]
    Parse(String),

    /// The target store rejected the load as a whole
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for snapshot operations.
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Serialized store content.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub papers: Vec<Paper>,

    #[serde(default)]
    pub entities: Vec<Entity>,

    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

/// Source of store snapshots.
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    /// Read and parse the whole snapshot.
    ///
    /// # Errors
    /// Returns `SnapshotError` if the source cannot be read or parsed
    async fn fetch_snapshot(&self) -> SnapshotResult<Snapshot>;

    /// Human-readable name of the source, for logging.
    fn name(&self) -> &str;
}

/// Outcome of loading a snapshot into a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadStats {
    /// Records looked at
    pub total_processed: usize,

    pub inserted: usize,

    /// Records whose id, name or triple was already stored
    pub duplicates_skipped: usize,

    /// Records rejected for other reasons, e.g. a dangling relationship
    pub failed: usize,
}

impl LoadStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one insert attempt.
    ///
    /// # Errors
    /// Passes through errors that mean the store itself is unusable
    fn record(&mut self, kind: &str, result: StorageResult<()>) -> StorageResult<()> {
        self.total_processed += 1;
        match result {
            Ok(()) => self.inserted += 1,
            Err(StorageError::DuplicateEntry(reason)) => {
                warn!(kind, %reason, "skipping duplicate record");
                self.duplicates_skipped += 1;
            }
            Err(StorageError::InvalidReference(reason)) => {
                warn!(kind, %reason, "skipping record with invalid reference");
                self.failed += 1;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

/// Insert a snapshot into `store`.
///
/// Entities go in before relationships so endpoints resolve. Duplicate and
/// dangling records are skipped and counted rather than aborting the load.
///
/// # Errors
/// Returns `SnapshotError::Storage` if the store becomes unavailable
pub fn load_into(store: &InMemoryStore, snapshot: Snapshot) -> SnapshotResult<LoadStats> {
    let mut stats = LoadStats::new();

    for paper in snapshot.papers {
        stats.record("paper", store.insert_paper(paper))?;
    }
    for entity in snapshot.entities {
        stats.record("entity", store.insert_entity(entity))?;
    }
    for relationship in snapshot.relationships {
        stats.record("relationship", store.insert_relationship(relationship))?;
    }

    Ok(stats)
}

/// Fetch a snapshot from `provider` and load it into a fresh store.
///
/// # Errors
/// Returns `SnapshotError` if fetching or loading fails
pub async fn load_store<S>(provider: &S) -> SnapshotResult<(InMemoryStore, LoadStats)>
where
    S: SnapshotProvider + ?Sized,
{
    let snapshot = provider.fetch_snapshot().await?;
    let store = InMemoryStore::new();
    let stats = load_into(&store, snapshot)?;

    info!(
        source = provider.name(),
        inserted = stats.inserted,
        duplicates = stats.duplicates_skipped,
        failed = stats.failed,
        "snapshot loaded"
    );
    Ok((store, stats))
}
