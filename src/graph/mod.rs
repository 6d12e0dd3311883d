//! In-memory working graph and the traversal algorithms that run over it.
//!
//! A [`WorkingGraph`] is built fresh for every query by the [`loader`] from a
//! read-only store snapshot. It is an id-keyed arena: entities and
//! relationships live in two tables and adjacency lists refer to them by id.
//! The algorithms in [`path`] and [`expand`] are synchronous and never touch
//! a store.

pub mod expand;
pub mod loader;
pub mod path;

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::models::{Entity, EntityId, Relationship, RelationshipId};

pub use expand::{Expansion, SubgraphExpander};
pub use loader::{GraphLoader, ReachOptions};
pub use path::{Path, PathFinder, PathOutcome, PathStep};

/// Which way a relationship is walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Orientation {
    /// subject → object
    Forward,
    /// object → subject, only for bidirectional relationships
    Reverse,
}

/// One traversable adjacency entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Hop {
    pub neighbor: EntityId,
    pub relationship: RelationshipId,
    pub orientation: Orientation,
    /// `confidence * strength` of the relationship
    pub weight: f64,
}

#[derive(Debug, Clone, Default)]
struct Adjacency {
    outgoing: Vec<Hop>,
    incoming: Vec<Hop>,
}

/// Bounds shared by the traversal algorithms.
#[derive(Debug, Clone, Copy)]
pub struct TraversalBudget {
    /// Maximum number of entities a traversal may visit
    pub max_visited: usize,

    /// Checked at every BFS level boundary
    pub deadline: Option<Instant>,
}

impl TraversalBudget {
    pub fn new(max_visited: usize) -> Self {
        Self {
            max_visited,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Ephemeral adjacency view over a bounded set of entities.
#[derive(Debug, Clone, Default)]
pub struct WorkingGraph {
    entities: BTreeMap<EntityId, Entity>,
    relationships: BTreeMap<RelationshipId, Relationship>,
    adjacency: BTreeMap<EntityId, Adjacency>,
    truncated: bool,
}

impl WorkingGraph {
    /// Build a graph from entities and relationships.
    ///
    /// Relationships whose subject or object is not among `entities` are
    /// dropped. Adjacency lists come out sorted by weight descending, then
    /// neighbor id, then relationship id, which is the visiting order every
    /// traversal relies on.
    pub fn build(
        entities: impl IntoIterator<Item = Entity>,
        relationships: impl IntoIterator<Item = Relationship>,
    ) -> Self {
        let entities: BTreeMap<EntityId, Entity> =
            entities.into_iter().map(|e| (e.id.clone(), e)).collect();
        let mut adjacency: BTreeMap<EntityId, Adjacency> = entities
            .keys()
            .map(|id| (id.clone(), Adjacency::default()))
            .collect();
        let mut kept = BTreeMap::new();

        for rel in relationships {
            if !entities.contains_key(&rel.subject) || !entities.contains_key(&rel.object) {
                tracing::debug!(
                    relationship = %rel.id,
                    "skipping relationship with unresolved endpoint"
                );
                continue;
            }

            let weight = rel.weight();
            let mut link = |from: &EntityId, to: &EntityId, orientation: Orientation| {
                let hop = |neighbor: &EntityId| Hop {
                    neighbor: neighbor.clone(),
                    relationship: rel.id.clone(),
                    orientation,
                    weight,
                };
                if let Some(adj) = adjacency.get_mut(from) {
                    adj.outgoing.push(hop(to));
                }
                if let Some(adj) = adjacency.get_mut(to) {
                    adj.incoming.push(hop(from));
                }
            };

            link(&rel.subject, &rel.object, Orientation::Forward);
            if rel.is_bidirectional() && rel.subject != rel.object {
                link(&rel.object, &rel.subject, Orientation::Reverse);
            }
            kept.insert(rel.id.clone(), rel);
        }

        for adj in adjacency.values_mut() {
            adj.outgoing.sort_by(hop_order);
            adj.incoming.sort_by(hop_order);
        }

        Self {
            entities,
            relationships: kept,
            adjacency,
            truncated: false,
        }
    }

    /// Mark the graph as cut short by a resource cap.
    pub fn mark_truncated(&mut self) {
        self.truncated = true;
    }

    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    pub fn relationship(&self, id: &RelationshipId) -> Option<&Relationship> {
        self.relationships.get(id)
    }

    pub fn contains(&self, id: &EntityId) -> bool {
        self.entities.contains_key(id)
    }

    /// Entities in id order.
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Relationships in id order.
    pub fn relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.values()
    }

    pub fn entity_ids(&self) -> BTreeSet<EntityId> {
        self.entities.keys().cloned().collect()
    }

    /// Hops that may be walked away from `id`, in visiting order.
    pub fn outgoing(&self, id: &EntityId) -> &[Hop] {
        self.adjacency
            .get(id)
            .map(|adj| adj.outgoing.as_slice())
            .unwrap_or(&[])
    }

    /// Hops that may be walked into `id`, in visiting order.
    pub fn incoming(&self, id: &EntityId) -> &[Hop] {
        self.adjacency
            .get(id)
            .map(|adj| adj.incoming.as_slice())
            .unwrap_or(&[])
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.relationships.len()
    }

    /// The induced subgraph on `ids`: those entities plus every relationship
    /// with both endpoints among them. The truncation flag is carried over.
    pub fn subgraph(&self, ids: &BTreeSet<EntityId>) -> WorkingGraph {
        let entities = ids.iter().filter_map(|id| self.entities.get(id).cloned());
        let relationships = self
            .relationships
            .values()
            .filter(|r| ids.contains(&r.subject) && ids.contains(&r.object))
            .cloned();
        let mut sub = WorkingGraph::build(entities, relationships);
        sub.truncated = self.truncated;
        sub
    }
}

fn hop_order(a: &Hop, b: &Hop) -> std::cmp::Ordering {
    b.weight
        .total_cmp(&a.weight)
        .then_with(|| a.neighbor.cmp(&b.neighbor))
        .then_with(|| a.relationship.cmp(&b.relationship))
        .then_with(|| a.orientation.cmp(&b.orientation))
}
