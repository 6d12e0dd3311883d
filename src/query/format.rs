//! View model returned to callers.
//!
//! Conversion from working graphs and paths into these types is a pure
//! transform; nothing here reads a store.

use serde::{Deserialize, Serialize};

use crate::graph::{Orientation, Path, WorkingGraph};
use crate::models::{Entity, EntityId, EntityType, Predicate, Relationship};

/// Graph node as drawn by the visualization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewNode {
    pub id: EntityId,
    pub name: String,

    #[serde(rename = "type")]
    pub entity_type: EntityType,

    /// Number of papers mentioning the entity
    pub size: usize,

    pub confidence: f64,
}

impl From<&Entity> for ViewNode {
    fn from(entity: &Entity) -> Self {
        Self {
            id: entity.id.clone(),
            name: entity.name.clone(),
            entity_type: entity.entity_type,
            size: entity.paper_count(),
            confidence: entity.confidence,
        }
    }
}

/// Graph edge as drawn by the visualization. Always subject → object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewLink {
    pub source: EntityId,
    pub target: EntityId,
    pub predicate: Predicate,
    pub confidence: f64,
    pub strength: f64,
}

impl From<&Relationship> for ViewLink {
    fn from(rel: &Relationship) -> Self {
        Self {
            source: rel.subject.clone(),
            target: rel.object.clone(),
            predicate: rel.predicate,
            confidence: rel.confidence,
            strength: rel.strength,
        }
    }
}

/// Store-wide totals, independent of the subset being returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphStats {
    pub total_entities: usize,
    pub total_relationships: usize,
    pub total_papers: usize,
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// Nodes and links ready for rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewGraph {
    pub nodes: Vec<ViewNode>,
    pub links: Vec<ViewLink>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stats: Option<GraphStats>,

    /// Set when a resource cap cut the result short
    #[serde(default, skip_serializing_if = "is_false")]
    pub truncated: bool,
}

/// Shape a working graph into a [`ViewGraph`].
///
/// Nodes and links come out in id order so identical graphs serialize
/// identically.
pub fn format_graph(graph: &WorkingGraph, stats: Option<GraphStats>) -> ViewGraph {
    ViewGraph {
        nodes: graph.entities().map(ViewNode::from).collect(),
        links: graph.relationships().map(ViewLink::from).collect(),
        stats,
        truncated: graph.is_truncated(),
    }
}

/// A traversed relationship inside a [`PathView`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathLink {
    pub id: String,
    pub source: EntityId,
    pub target: EntityId,
    pub predicate: Predicate,
    pub confidence: f64,
    pub strength: f64,

    /// Walked object → subject over a bidirectional relationship
    pub reversed: bool,
}

/// One element of a path, entity and relationship alternating.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PathElement {
    Entity(ViewNode),
    Relationship(PathLink),
}

/// Path ready for rendering.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathView {
    pub hops: usize,

    /// Product of `confidence * strength` along the path
    pub strength: f64,

    pub elements: Vec<PathElement>,
}

/// Shape a path into a [`PathView`].
pub fn format_path(path: &Path) -> PathView {
    let mut elements = Vec::with_capacity(path.entities.len() + path.steps.len());
    for (i, entity) in path.entities.iter().enumerate() {
        if i > 0 {
            if let Some(step) = path.steps.get(i - 1) {
                let rel = &step.relationship;
                elements.push(PathElement::Relationship(PathLink {
                    id: rel.id.to_string(),
                    source: rel.subject.clone(),
                    target: rel.object.clone(),
                    predicate: rel.predicate,
                    confidence: rel.confidence,
                    strength: rel.strength,
                    reversed: step.orientation == Orientation::Reverse,
                }));
            }
        }
        elements.push(PathElement::Entity(ViewNode::from(entity)));
    }

    PathView {
        hops: path.hops(),
        strength: path.strength(),
        elements,
    }
}
