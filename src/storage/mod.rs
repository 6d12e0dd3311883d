//! Storage layer abstraction.
//!
//! The query engine reads entities, relationships and paper counts through the
//! traits in this module. Store handles are passed into the engine at
//! construction, so tests and binaries can supply their own backends.

pub mod memory;

use std::cmp::Ordering;
use std::collections::BTreeSet;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Entity, EntityId, EntityType, Relationship};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing store cannot be reached
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Query execution error
    #[error("Query execution failed: {0}")]
    QueryError(String),

    /// Unique constraint violated (entity name or relationship triple)
    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    /// A relationship names an entity the store does not hold
    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    /// Data serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Other unexpected errors
    #[error("Unexpected storage error: {0}")]
    Other(String),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Filter for entity listings.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityFilter {
    /// Restrict to one entity type
    pub entity_type: Option<EntityType>,

    /// Case-insensitive substring over name and aliases
    pub search: Option<String>,
}

impl EntityFilter {
    /// Check whether an entity passes this filter.
    pub fn matches(&self, entity: &Entity) -> bool {
        if let Some(entity_type) = self.entity_type {
            if entity.entity_type != entity_type {
                return false;
            }
        }
        match &self.search {
            Some(search) => entity.matches_text(&search.to_lowercase()),
            None => true,
        }
    }
}

/// Ordering used for "best connected first" listings: paper count
/// descending, then total mentions descending, then id ascending.
pub fn compare_by_connections(a: &Entity, b: &Entity) -> Ordering {
    b.paper_count()
        .cmp(&a.paper_count())
        .then_with(|| b.total_mentions().cmp(&a.total_mentions()))
        .then_with(|| a.id.cmp(&b.id))
}

/// Read access to persisted entities.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Fetch entities by id.
    ///
    /// Ids with no stored entity are skipped; the result is not required to
    /// preserve input order.
    async fn fetch_by_ids(&self, ids: &BTreeSet<EntityId>) -> StorageResult<Vec<Entity>>;

    /// Fetch the `limit` best-connected entities.
    ///
    /// Ranked by paper count descending, then total mentions descending,
    /// then id ascending.
    async fn fetch_top_by_connections(&self, limit: usize) -> StorageResult<Vec<Entity>>;

    /// Find entities whose name or any alias contains `query`, ignoring case.
    ///
    /// When `types` is non-empty only entities of those types are returned.
    async fn search_by_name_or_alias(
        &self,
        query: &str,
        types: &BTreeSet<EntityType>,
    ) -> StorageResult<Vec<Entity>>;

    /// Page through entities passing `filter`, ordered like
    /// [`EntityStore::fetch_top_by_connections`].
    async fn list(
        &self,
        filter: &EntityFilter,
        offset: usize,
        limit: usize,
    ) -> StorageResult<Vec<Entity>>;

    /// Count entities passing `filter`.
    async fn count_matching(&self, filter: &EntityFilter) -> StorageResult<usize>;

    /// Total number of stored entities.
    async fn count_all(&self) -> StorageResult<usize>;
}

/// Read access to persisted relationships.
#[async_trait]
pub trait RelationshipStore: Send + Sync {
    /// Fetch relationships whose subject and object are both in `ids`.
    async fn fetch_by_endpoints(&self, ids: &BTreeSet<EntityId>)
        -> StorageResult<Vec<Relationship>>;

    /// Fetch relationships with at least one endpoint in `ids`.
    async fn fetch_incident(&self, ids: &BTreeSet<EntityId>) -> StorageResult<Vec<Relationship>>;

    /// Total number of stored relationships.
    async fn count_all(&self) -> StorageResult<usize>;
}

/// Read access to paper totals.
#[async_trait]
pub trait PaperStore: Send + Sync {
    /// Total number of stored papers.
    async fn count_all(&self) -> StorageResult<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_filter() {
        let entity = Entity::new("e1", "BRCA1", EntityType::Gene).with_alias("breast cancer 1");

        assert!(EntityFilter::default().matches(&entity));
        assert!(EntityFilter {
            entity_type: Some(EntityType::Gene),
            search: Some("Cancer".to_string()),
        }
        .matches(&entity));
        assert!(!EntityFilter {
            entity_type: Some(EntityType::Protein),
            search: None,
        }
        .matches(&entity));
        assert!(!EntityFilter {
            entity_type: None,
            search: Some("tp53".to_string()),
        }
        .matches(&entity));
    }
}
