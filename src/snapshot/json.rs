//! JSON snapshot files.
//!
//! The file is one object with `papers`, `entities` and `relationships`
//! arrays, each optional:
//!
//! ```json
//! {
//!   "papers": [{"id": "p1", "title": "..."}],
//!   "entities": [{"id": "e1", "name": "Insulin", "type": "protein"}],
//!   "relationships": [
//!     {"id": "r1", "subject": "e1", "predicate": "binds_to", "object": "e2",
//!      "confidence": 0.9, "direction": "bidirectional"}
//!   ]
//! }
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use super::{Snapshot, SnapshotError, SnapshotProvider, SnapshotResult};

#[derive(Debug, Clone)]
enum Source {
    File(PathBuf),
    Inline(String),
}

/// Reads a [`Snapshot`] from a JSON file or string.
#[derive(Debug, Clone)]
pub struct JsonSnapshotProvider {
    source: Source,
    name: String,
}

impl JsonSnapshotProvider {
    /// Provider for a file on disk. The file is read on every fetch.
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: format!("json:{}", path.display()),
            source: Source::File(path),
        }
    }

    /// Provider for JSON already in memory.
    pub fn from_json_str(json: impl Into<String>) -> Self {
        Self {
            source: Source::Inline(json.into()),
            name: "json:inline".to_string(),
        }
    }

    fn parse(&self, raw: &str) -> SnapshotResult<Snapshot> {
        serde_json::from_str(raw).map_err(|e| SnapshotError::Parse(format!("{}: {}", self.name, e)))
    }
}

#[async_trait]
impl SnapshotProvider for JsonSnapshotProvider {
    async fn fetch_snapshot(&self) -> SnapshotResult<Snapshot> {
        let snapshot = match &self.source {
            Source::File(path) => {
                let raw = tokio::fs::read_to_string(path).await?;
                self.parse(&raw)?
            }
            Source::Inline(raw) => self.parse(raw)?,
        };

        debug!(
            source = %self.name,
            papers = snapshot.papers.len(),
            entities = snapshot.entities.len(),
            relationships = snapshot.relationships.len(),
            "parsed snapshot"
        );
        Ok(snapshot)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Direction, EntityId, EntityType, Predicate};
    use crate::snapshot::load_store;
    use crate::storage::EntityStore;
    use std::collections::BTreeSet;
    use std::io::Write;

    const SAMPLE: &str = r#"{
        "papers": [{"id": "p1", "title": "Insulin signalling"}],
        "entities": [
            {"id": "e1", "name": "Insulin", "type": "protein",
             "aliases": ["INS"], "papers": [{"paper_id": "p1", "mention_count": 4}]},
            {"id": "e2", "name": "Insulin receptor", "type": "protein", "confidence": 1.7}
        ],
        "relationships": [
            {"id": "r1", "subject": "e1", "predicate": "binds_to", "object": "e2",
             "confidence": 0.9, "direction": "bidirectional"}
        ]
    }"#;

    #[tokio::test]
    async fn test_parse_inline() {
        let provider = JsonSnapshotProvider::from_json_str(SAMPLE);
        let snapshot = provider.fetch_snapshot().await.unwrap();

        assert_eq!(snapshot.entities.len(), 2);
        assert_eq!(snapshot.entities[0].entity_type, EntityType::Protein);
        assert_eq!(snapshot.entities[0].papers[0].mention_count, 4);
        assert_eq!(snapshot.entities[1].confidence, 1.7);

        let rel = &snapshot.relationships[0];
        assert_eq!(rel.predicate, Predicate::BindsTo);
        assert_eq!(rel.direction, Direction::Bidirectional);
        assert_eq!(rel.strength, 0.5);
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let provider = JsonSnapshotProvider::from_file(file.path());
        let (store, stats) = load_store(&provider).await.unwrap();

        assert_eq!(stats.inserted, 4);
        assert_eq!(stats.failed, 0);
        let top = store.fetch_top_by_connections(1).await.unwrap();
        assert_eq!(top[0].id.as_str(), "e1");

        // Confidence is clamped on insert.
        let ids: BTreeSet<EntityId> = [EntityId::from("e2")].into();
        let e2 = store.fetch_by_ids(&ids).await.unwrap();
        assert_eq!(e2[0].confidence, 1.0);
    }

    #[tokio::test]
    async fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let provider = JsonSnapshotProvider::from_file(dir.path().join("absent.json"));
        let result = provider.fetch_snapshot().await;
        assert!(matches!(result, Err(SnapshotError::Io(_))));
    }

    #[tokio::test]
    async fn test_malformed_json_is_parse_error() {
        let provider = JsonSnapshotProvider::from_json_str(r#"{"entities": [{"id": 3}]}"#);
        let result = provider.fetch_snapshot().await;
        assert!(matches!(result, Err(SnapshotError::Parse(msg)) if msg.starts_with("json:inline")));
    }
}
