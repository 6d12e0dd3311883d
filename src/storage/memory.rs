//! In-memory storage implementation.
//!
//! Holds a snapshot of entities, relationships and papers behind a shared
//! `RwLock`. Cloning the store clones the handle, not the data, so one loaded
//! snapshot can back any number of concurrent queries.
//!
//! Inserts enforce the data-model invariants: entity names are unique,
//! relationship endpoints must exist, and each `(subject, predicate, object)`
//! triple is stored once.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{
    compare_by_connections, EntityFilter, EntityStore, PaperStore, RelationshipStore,
    StorageError, StorageResult,
};
use crate::models::{Entity, EntityId, EntityType, Paper, PaperId, Predicate, Relationship, RelationshipId};

#[derive(Debug, Default)]
struct StoreState {
    entities: BTreeMap<EntityId, Entity>,
    names: HashMap<String, EntityId>,
    relationships: BTreeMap<RelationshipId, Relationship>,
    triples: HashSet<(EntityId, Predicate, EntityId)>,
    incident: HashMap<EntityId, BTreeSet<RelationshipId>>,
    papers: BTreeMap<PaperId, Paper>,
}

/// Snapshot store kept entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StorageResult<RwLockReadGuard<'_, StoreState>> {
        self.state
            .read()
            .map_err(|_| StorageError::Unavailable("store lock poisoned".to_string()))
    }

    fn write(&self) -> StorageResult<RwLockWriteGuard<'_, StoreState>> {
        self.state
            .write()
            .map_err(|_| StorageError::Unavailable("store lock poisoned".to_string()))
    }

    /// Insert an entity.
    ///
    /// # Errors
    /// Returns `StorageError::DuplicateEntry` if the id or the name is taken
    pub fn insert_entity(&self, entity: Entity) -> StorageResult<()> {
        let entity = entity.normalized();
        let mut state = self.write()?;

        if state.entities.contains_key(&entity.id) {
            return Err(StorageError::DuplicateEntry(format!(
                "entity id '{}' already exists",
                entity.id
            )));
        }
        if let Some(existing) = state.names.get(&entity.name) {
            return Err(StorageError::DuplicateEntry(format!(
                "entity name '{}' already used by '{}'",
                entity.name, existing
            )));
        }

        state.names.insert(entity.name.clone(), entity.id.clone());
        state.entities.insert(entity.id.clone(), entity);
        Ok(())
    }

    /// Insert a relationship between two stored entities.
    ///
    /// # Errors
    /// Returns `StorageError::InvalidReference` if an endpoint is missing and
    /// `StorageError::DuplicateEntry` if the id or the triple already exists
    pub fn insert_relationship(&self, relationship: Relationship) -> StorageResult<()> {
        let relationship = relationship.normalized();
        let mut state = self.write()?;

        for endpoint in [&relationship.subject, &relationship.object] {
            if !state.entities.contains_key(endpoint) {
                return Err(StorageError::InvalidReference(format!(
                    "relationship '{}' references unknown entity '{}'",
                    relationship.id, endpoint
                )));
            }
        }
        if state.relationships.contains_key(&relationship.id) {
            return Err(StorageError::DuplicateEntry(format!(
                "relationship id '{}' already exists",
                relationship.id
            )));
        }

        let triple = (
            relationship.subject.clone(),
            relationship.predicate,
            relationship.object.clone(),
        );
        if state.triples.contains(&triple) {
            return Err(StorageError::DuplicateEntry(format!(
                "relationship {} {} {} already exists",
                relationship.subject, relationship.predicate, relationship.object
            )));
        }
        state.triples.insert(triple);

        for endpoint in [relationship.subject.clone(), relationship.object.clone()] {
            state
                .incident
                .entry(endpoint)
                .or_default()
                .insert(relationship.id.clone());
        }
        state
            .relationships
            .insert(relationship.id.clone(), relationship);
        Ok(())
    }

    /// Insert a paper record.
    ///
    /// # Errors
    /// Returns `StorageError::DuplicateEntry` if the id is taken
    pub fn insert_paper(&self, paper: Paper) -> StorageResult<()> {
        let mut state = self.write()?;
        if state.papers.contains_key(&paper.id) {
            return Err(StorageError::DuplicateEntry(format!(
                "paper id '{}' already exists",
                paper.id
            )));
        }
        state.papers.insert(paper.id.clone(), paper);
        Ok(())
    }

    fn ranked<'a>(entities: impl Iterator<Item = &'a Entity>) -> Vec<Entity> {
        let mut ranked: Vec<Entity> = entities.cloned().collect();
        ranked.sort_by(compare_by_connections);
        ranked
    }
}

#[async_trait]
impl EntityStore for InMemoryStore {
    async fn fetch_by_ids(&self, ids: &BTreeSet<EntityId>) -> StorageResult<Vec<Entity>> {
        let state = self.read()?;
        Ok(ids
            .iter()
            .filter_map(|id| state.entities.get(id).cloned())
            .collect())
    }

    async fn fetch_top_by_connections(&self, limit: usize) -> StorageResult<Vec<Entity>> {
        let state = self.read()?;
        let mut ranked = Self::ranked(state.entities.values());
        ranked.truncate(limit);
        Ok(ranked)
    }

    async fn search_by_name_or_alias(
        &self,
        query: &str,
        types: &BTreeSet<EntityType>,
    ) -> StorageResult<Vec<Entity>> {
        let needle = query.to_lowercase();
        let state = self.read()?;
        Ok(state
            .entities
            .values()
            .filter(|e| types.is_empty() || types.contains(&e.entity_type))
            .filter(|e| e.matches_text(&needle))
            .cloned()
            .collect())
    }

    async fn list(
        &self,
        filter: &EntityFilter,
        offset: usize,
        limit: usize,
    ) -> StorageResult<Vec<Entity>> {
        let state = self.read()?;
        Ok(Self::ranked(state.entities.values().filter(|e| filter.matches(e)))
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn count_matching(&self, filter: &EntityFilter) -> StorageResult<usize> {
        let state = self.read()?;
        Ok(state.entities.values().filter(|e| filter.matches(e)).count())
    }

    async fn count_all(&self) -> StorageResult<usize> {
        Ok(self.read()?.entities.len())
    }
}

#[async_trait]
impl RelationshipStore for InMemoryStore {
    async fn fetch_by_endpoints(
        &self,
        ids: &BTreeSet<EntityId>,
    ) -> StorageResult<Vec<Relationship>> {
        Ok(self
            .fetch_incident(ids)
            .await?
            .into_iter()
            .filter(|r| ids.contains(&r.subject) && ids.contains(&r.object))
            .collect())
    }

    async fn fetch_incident(&self, ids: &BTreeSet<EntityId>) -> StorageResult<Vec<Relationship>> {
        let state = self.read()?;
        let rel_ids: BTreeSet<&RelationshipId> = ids
            .iter()
            .filter_map(|id| state.incident.get(id))
            .flatten()
            .collect();
        Ok(rel_ids
            .into_iter()
            .filter_map(|id| state.relationships.get(id).cloned())
            .collect())
    }

    async fn count_all(&self) -> StorageResult<usize> {
        Ok(self.read()?.relationships.len())
    }
}

#[async_trait]
impl PaperStore for InMemoryStore {
    async fn count_all(&self) -> StorageResult<usize> {
        Ok(self.read()?.papers.len())
    }
}
