//! Materializes bounded working graphs from the stores.
//!
//! Every store call in a query goes through [`GraphLoader`]; these are the
//! only points where a query waits on I/O.

use std::collections::BTreeSet;

use tracing::debug;

use super::{Orientation, TraversalBudget, WorkingGraph};
use crate::models::{Entity, EntityId, Relationship};
use crate::storage::{EntityStore, RelationshipStore, StorageResult};

/// Parameters for [`GraphLoader::load_reachable`].
#[derive(Debug, Clone)]
pub struct ReachOptions {
    /// Number of BFS levels to discover
    pub radius: usize,

    /// Stop after the level on which this entity is discovered
    pub target: Option<EntityId>,

    pub budget: TraversalBudget,
}

/// Fetches entities and relationships and builds a [`WorkingGraph`].
pub struct GraphLoader<'a, E, R>
where
    E: EntityStore + ?Sized,
    R: RelationshipStore + ?Sized,
{
    entities: &'a E,
    relationships: &'a R,

    /// Hard ceiling on entities per load, whatever the caller asks for
    max_entities: usize,
}

impl<'a, E, R> GraphLoader<'a, E, R>
where
    E: EntityStore + ?Sized,
    R: RelationshipStore + ?Sized,
{
    /// Create a loader over the given stores.
    ///
    /// # Arguments
    /// * `entities` - Entity store handle
    /// * `relationships` - Relationship store handle
    /// * `max_entities` - Ceiling applied to every `limit` (at least 1)
    pub fn new(entities: &'a E, relationships: &'a R, max_entities: usize) -> Self {
        Self {
            entities,
            relationships,
            max_entities: max_entities.max(1),
        }
    }

    fn clamp_limit(&self, limit: usize) -> usize {
        limit.clamp(1, self.max_entities)
    }

    /// Load the given entities and every relationship among them.
    ///
    /// Ids the store does not know are skipped. If more than `limit` entities
    /// resolve, the lowest ids are kept and the graph is marked truncated.
    ///
    /// # Errors
    /// Propagates `StorageError` from either store unchanged
    pub async fn load(&self, ids: &BTreeSet<EntityId>, limit: usize) -> StorageResult<WorkingGraph> {
        let limit = self.clamp_limit(limit);
        let mut resolved = self.entities.fetch_by_ids(ids).await?;
        if resolved.len() < ids.len() {
            debug!(
                requested = ids.len(),
                resolved = resolved.len(),
                "some entity ids are not in the store"
            );
        }

        resolved.sort_by(|a, b| a.id.cmp(&b.id));
        let truncated = resolved.len() > limit;
        resolved.truncate(limit);

        let mut graph = self.with_relationships(resolved).await?;
        if truncated {
            graph.mark_truncated();
        }
        Ok(graph)
    }

    /// Load the `limit` best-connected entities and the relationships among
    /// exactly those.
    ///
    /// # Errors
    /// Propagates `StorageError` from either store unchanged
    pub async fn load_top(&self, limit: usize) -> StorageResult<WorkingGraph> {
        let limit = self.clamp_limit(limit);
        let top = self.entities.fetch_top_by_connections(limit).await?;
        debug!(limit, loaded = top.len(), "loaded top entities");
        self.with_relationships(top).await
    }

    async fn with_relationships(&self, entities: Vec<Entity>) -> StorageResult<WorkingGraph> {
        let ids: BTreeSet<EntityId> = entities.iter().map(|e| e.id.clone()).collect();
        let relationships = if ids.is_empty() {
            Vec::new()
        } else {
            self.relationships.fetch_by_endpoints(&ids).await?
        };
        Ok(WorkingGraph::build(entities, relationships))
    }

    /// Discover everything reachable from `seeds` within `options.radius`
    /// traversable hops, then load that set.
    ///
    /// Discovery fetches only the relationships touching the current
    /// frontier, so memory stays proportional to what is explored. It stops
    /// early, marking the graph truncated, when the visited cap would be
    /// exceeded or the deadline has passed at a level boundary.
    ///
    /// # Errors
    /// Propagates `StorageError` from either store unchanged
    pub async fn load_reachable(
        &self,
        seeds: &BTreeSet<EntityId>,
        options: &ReachOptions,
    ) -> StorageResult<WorkingGraph> {
        let cap = self.clamp_limit(options.budget.max_visited);
        let mut truncated = false;

        // Seeds must exist before they can be expanded.
        let mut visited: BTreeSet<EntityId> = self
            .entities
            .fetch_by_ids(seeds)
            .await?
            .into_iter()
            .map(|e| e.id)
            .collect();
        if visited.len() > cap {
            visited = visited.into_iter().take(cap).collect();
            truncated = true;
        }
        let mut frontier = visited.clone();

        'levels: for level in 0..options.radius {
            if frontier.is_empty() {
                break;
            }
            if let Some(target) = &options.target {
                if visited.contains(target) {
                    break;
                }
            }
            if options.budget.expired() {
                debug!(level, "deadline reached while loading");
                truncated = true;
                break;
            }

            let incident = self.relationships.fetch_incident(&frontier).await?;
            let candidates: BTreeSet<EntityId> = incident
                .iter()
                .flat_map(|rel| traversable_from(rel, &frontier))
                .filter(|id| !visited.contains(id))
                .collect();
            if candidates.is_empty() {
                break;
            }

            // Relationships can point at entities ingestion has not stored yet.
            let existing = self.entities.fetch_by_ids(&candidates).await?;
            let discovered: BTreeSet<EntityId> = existing.into_iter().map(|e| e.id).collect();

            let mut next = BTreeSet::new();
            for id in discovered {
                if visited.len() >= cap {
                    debug!(level, cap, "visited cap reached while loading");
                    truncated = true;
                    break 'levels;
                }
                visited.insert(id.clone());
                next.insert(id);
            }
            frontier = next;
        }

        let mut graph = self.load(&visited, cap).await?;
        if truncated {
            graph.mark_truncated();
        }
        debug!(
            seeds = seeds.len(),
            entities = graph.entity_count(),
            relationships = graph.relationship_count(),
            truncated = graph.is_truncated(),
            "loaded reachable graph"
        );
        Ok(graph)
    }
}

/// Neighbors a relationship lets the walk reach from any frontier entity.
fn traversable_from(rel: &Relationship, frontier: &BTreeSet<EntityId>) -> Vec<EntityId> {
    let mut reached = Vec::with_capacity(2);
    for orientation in [Orientation::Forward, Orientation::Reverse] {
        let (from, to) = match orientation {
            Orientation::Forward => (&rel.subject, &rel.object),
            Orientation::Reverse if rel.is_bidirectional() => (&rel.object, &rel.subject),
            Orientation::Reverse => continue,
        };
        if frontier.contains(from) {
            reached.push(to.clone());
        }
    }
    reached
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntityType, Predicate};
    use crate::storage::memory::InMemoryStore;
    use crate::storage::StorageError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ids(values: &[&str]) -> BTreeSet<EntityId> {
        values.iter().map(|v| EntityId::from(*v)).collect()
    }

    /// a -> b -> c -> d chain, plus e <-> a bidirectional.
    fn chain_store() -> InMemoryStore {
        let store = InMemoryStore::new();
        for (id, mentions) in [("a", 3), ("b", 2), ("c", 1), ("d", 0), ("e", 0)] {
            let mut entity = Entity::new(id, id.to_uppercase(), EntityType::Gene);
            for p in 0..mentions {
                entity = entity.with_mention(format!("p{p}"), 1);
            }
            store.insert_entity(entity).unwrap();
        }
        let rels = [("r1", "a", "b"), ("r2", "b", "c"), ("r3", "c", "d")];
        for (id, s, o) in rels {
            store
                .insert_relationship(Relationship::new(
                    id,
                    s,
                    Predicate::Regulates,
                    o,
                    0.8,
                ))
                .unwrap();
        }
        store
            .insert_relationship(
                Relationship::new("r4", "e", Predicate::BindsTo, "a", 0.6)
                    .bidirectional(),
            )
            .unwrap();
        store
    }

    fn budget(max_visited: usize) -> TraversalBudget {
        TraversalBudget::new(max_visited)
    }

    #[tokio::test]
    async fn test_load_skips_missing_ids() {
        let store = chain_store();
        let loader = GraphLoader::new(&store, &store, 100);
        let graph = loader.load(&ids(&["a", "b", "zzz"]), 10).await.unwrap();

        assert_eq!(graph.entity_count(), 2);
        assert_eq!(graph.relationship_count(), 1);
        assert!(!graph.is_truncated());
    }

    #[tokio::test]
    async fn test_load_respects_limit() {
        let store = chain_store();
        let loader = GraphLoader::new(&store, &store, 100);
        let graph = loader.load(&ids(&["a", "b", "c"]), 2).await.unwrap();

        assert_eq!(graph.entity_ids(), ids(&["a", "b"]));
        assert!(graph.is_truncated());
    }

    #[tokio::test]
    async fn test_load_top_uses_ceiling() {
        let store = chain_store();
        let loader = GraphLoader::new(&store, &store, 2);
        let graph = loader.load_top(1_000).await.unwrap();

        assert_eq!(graph.entity_ids(), ids(&["a", "b"]));
        assert_eq!(graph.relationship_count(), 1);
    }

    #[tokio::test]
    async fn test_load_reachable_follows_direction() {
        let store = chain_store();
        let loader = GraphLoader::new(&store, &store, 100);

        // From c only forward edges lead on: c -> d.
        let options = ReachOptions {
            radius: 5,
            target: None,
            budget: budget(100),
        };
        let graph = loader.load_reachable(&ids(&["c"]), &options).await.unwrap();
        assert_eq!(graph.entity_ids(), ids(&["c", "d"]));

        // From a the bidirectional edge reaches e as well.
        let options = ReachOptions {
            radius: 1,
            target: None,
            budget: budget(100),
        };
        let graph = loader.load_reachable(&ids(&["a"]), &options).await.unwrap();
        assert_eq!(graph.entity_ids(), ids(&["a", "b", "e"]));
    }

    #[tokio::test]
    async fn test_load_reachable_stops_at_target_level() {
        let store = chain_store();
        let loader = GraphLoader::new(&store, &store, 100);
        let options = ReachOptions {
            radius: 10,
            target: Some(EntityId::from("b")),
            budget: budget(100),
        };
        let graph = loader.load_reachable(&ids(&["a"]), &options).await.unwrap();
        assert_eq!(graph.entity_ids(), ids(&["a", "b", "e"]));
    }

    #[tokio::test]
    async fn test_load_reachable_truncates_at_cap() {
        let store = chain_store();
        let loader = GraphLoader::new(&store, &store, 100);
        let options = ReachOptions {
            radius: 10,
            target: None,
            budget: budget(2),
        };
        let graph = loader.load_reachable(&ids(&["a"]), &options).await.unwrap();
        assert_eq!(graph.entity_count(), 2);
        assert!(graph.is_truncated());
    }

    #[tokio::test]
    async fn test_load_reachable_expired_deadline() {
        let store = chain_store();
        let loader = GraphLoader::new(&store, &store, 100);
        let options = ReachOptions {
            radius: 3,
            target: None,
            budget: budget(100).with_deadline(Some(std::time::Instant::now())),
        };
        let graph = loader.load_reachable(&ids(&["a"]), &options).await.unwrap();
        assert_eq!(graph.entity_ids(), ids(&["a"]));
        assert!(graph.is_truncated());
    }

    /// Relationship store that fails on every call and counts them.
    struct FailingRelationships {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RelationshipStore for FailingRelationships {
        async fn fetch_by_endpoints(
            &self,
            _ids: &BTreeSet<EntityId>,
        ) -> StorageResult<Vec<Relationship>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::Unavailable("mock outage".to_string()))
        }

        async fn fetch_incident(
            &self,
            _ids: &BTreeSet<EntityId>,
        ) -> StorageResult<Vec<Relationship>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(StorageError::Unavailable("mock outage".to_string()))
        }

        async fn count_all(&self) -> StorageResult<usize> {
            Err(StorageError::Unavailable("mock outage".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_errors_propagate_without_retry() {
        let store = chain_store();
        let failing = FailingRelationships {
            calls: AtomicUsize::new(0),
        };
        let loader = GraphLoader::new(&store, &failing, 100);

        let result = loader.load(&ids(&["a", "b"]), 10).await;
        assert!(matches!(result, Err(StorageError::Unavailable(_))));
        assert_eq!(failing.calls.load(Ordering::SeqCst), 1);
    }
}
