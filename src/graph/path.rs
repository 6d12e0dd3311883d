//! Shortest-path search with deterministic tie-breaking.
//!
//! Plain breadth-first search finds a minimum-hop path. To make the choice
//! between several minimum-hop paths reproducible, hops out of every entity
//! are visited in [`WorkingGraph::outgoing`] order: highest
//! `confidence * strength` first, then smallest neighbor id. Because the
//! queue is FIFO, the first parent recorded for an entity is the one reached
//! through the best edge sequence from the start, so the returned path is the
//! lexicographically best minimum-hop path under that ordering.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::Serialize;
use tracing::debug;

use super::{Orientation, TraversalBudget, WorkingGraph};
use crate::models::{Entity, EntityId, Relationship};

/// One traversed relationship in a [`Path`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathStep {
    pub relationship: Relationship,
    pub orientation: Orientation,
}

/// Alternating sequence of entities and the relationships between them.
///
/// `entities.len() == steps.len() + 1`; a path from an entity to itself has
/// no steps.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Path {
    pub entities: Vec<Entity>,
    pub steps: Vec<PathStep>,
}

impl Path {
    pub fn hops(&self) -> usize {
        self.steps.len()
    }

    /// Product of `confidence * strength` over all steps; 1.0 for an empty path.
    pub fn strength(&self) -> f64 {
        self.steps
            .iter()
            .map(|step| step.relationship.weight())
            .product()
    }

    pub fn start(&self) -> Option<&Entity> {
        self.entities.first()
    }

    pub fn end(&self) -> Option<&Entity> {
        self.entities.last()
    }
}

/// Result of a path search.
#[derive(Debug, Clone, PartialEq)]
pub enum PathOutcome {
    Found(Path),

    /// Target not reached within the hop bound. `truncated` is set when the
    /// visited cap or deadline ended the search before the bound was explored.
    NoPath { truncated: bool },
}

impl PathOutcome {
    pub fn path(&self) -> Option<&Path> {
        match self {
            PathOutcome::Found(path) => Some(path),
            PathOutcome::NoPath { .. } => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Parent {
    entity: EntityId,
    hop_index: usize,
}

/// Breadth-first shortest-path search over a [`WorkingGraph`].
pub struct PathFinder<'g> {
    graph: &'g WorkingGraph,
    budget: TraversalBudget,
}

impl<'g> PathFinder<'g> {
    pub fn new(graph: &'g WorkingGraph, budget: TraversalBudget) -> Self {
        Self { graph, budget }
    }

    /// Find a minimum-hop path from `from` to `to` using at most `max_hops`
    /// hops.
    ///
    /// Endpoints missing from the graph give `NoPath`; callers are expected
    /// to have checked the store for them already.
    pub fn find(&self, from: &EntityId, to: &EntityId, max_hops: usize) -> PathOutcome {
        if !self.graph.contains(from) || !self.graph.contains(to) {
            return PathOutcome::NoPath {
                truncated: self.graph.is_truncated(),
            };
        }
        if from == to {
            return PathOutcome::Found(self.assemble(from, to, &BTreeMap::new()));
        }

        let mut visited: BTreeSet<EntityId> = BTreeSet::from([from.clone()]);
        let mut parents: BTreeMap<EntityId, Parent> = BTreeMap::new();
        let mut frontier: VecDeque<EntityId> = VecDeque::from([from.clone()]);
        let mut truncated = self.graph.is_truncated();

        'levels: for depth in 0..max_hops {
            if frontier.is_empty() {
                break;
            }
            if self.budget.expired() {
                debug!(depth, "deadline reached during path search");
                truncated = true;
                break;
            }

            let mut next = VecDeque::new();
            while let Some(current) = frontier.pop_front() {
                for (hop_index, hop) in self.graph.outgoing(&current).iter().enumerate() {
                    if visited.contains(&hop.neighbor) {
                        continue;
                    }
                    if visited.len() >= self.budget.max_visited {
                        debug!(depth, "visited cap reached during path search");
                        truncated = true;
                        break 'levels;
                    }
                    visited.insert(hop.neighbor.clone());
                    parents.insert(
                        hop.neighbor.clone(),
                        Parent {
                            entity: current.clone(),
                            hop_index,
                        },
                    );
                    if &hop.neighbor == to {
                        return PathOutcome::Found(self.assemble(from, to, &parents));
                    }
                    next.push_back(hop.neighbor.clone());
                }
            }
            frontier = next;
        }

        PathOutcome::NoPath { truncated }
    }

    /// Walk parent links back from `to` and materialize the path.
    fn assemble(&self, from: &EntityId, to: &EntityId, parents: &BTreeMap<EntityId, Parent>) -> Path {
        let mut ids = vec![to.clone()];
        let mut steps = Vec::new();
        let mut cursor = to.clone();

        while &cursor != from {
            let Some(parent) = parents.get(&cursor) else {
                break;
            };
            let hop = &self.graph.outgoing(&parent.entity)[parent.hop_index];
            if let Some(relationship) = self.graph.relationship(&hop.relationship) {
                steps.push(PathStep {
                    relationship: relationship.clone(),
                    orientation: hop.orientation,
                });
            }
            ids.push(parent.entity.clone());
            cursor = parent.entity.clone();
        }

        ids.reverse();
        steps.reverse();
        let entities = ids
            .iter()
            .filter_map(|id| self.graph.entity(id).cloned())
            .collect();
        Path { entities, steps }
    }
}
