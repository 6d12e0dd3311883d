//! Core data models for the knowledge graph.
//!
//! Entities and relationships are produced by the ingestion pipeline and only
//! read here. Relationships reference entities by id; nothing in this module
//! holds a pointer to another record.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }
    };
}

string_id!(
    /// Identifier of an [`Entity`]. Ordered lexicographically.
    EntityId
);
string_id!(
    /// Identifier of a [`Relationship`].
    RelationshipId
);
string_id!(
    /// Identifier of a source paper.
    PaperId
);

/// Error returned when a string does not name a known enum variant.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown {kind} '{value}'")]
pub struct ParseKindError {
    pub kind: &'static str,
    pub value: String,
}

/// Lowercases and maps `-`/space to `_` so "CELL_TYPE", "cell-type" and
/// "cell type" all parse the same.
fn canonical_token(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| match c {
            '-' | ' ' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Kind of scientific concept an entity stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Protein,
    Gene,
    Disease,
    Drug,
    Organism,
    CellType,
    Tissue,
    Pathway,
    Concept,
    Method,
    Other,
}

impl EntityType {
    pub const ALL: [EntityType; 11] = [
        EntityType::Protein,
        EntityType::Gene,
        EntityType::Disease,
        EntityType::Drug,
        EntityType::Organism,
        EntityType::CellType,
        EntityType::Tissue,
        EntityType::Pathway,
        EntityType::Concept,
        EntityType::Method,
        EntityType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Protein => "protein",
            EntityType::Gene => "gene",
            EntityType::Disease => "disease",
            EntityType::Drug => "drug",
            EntityType::Organism => "organism",
            EntityType::CellType => "cell_type",
            EntityType::Tissue => "tissue",
            EntityType::Pathway => "pathway",
            EntityType::Concept => "concept",
            EntityType::Method => "method",
            EntityType::Other => "other",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = canonical_token(s);
        EntityType::ALL
            .into_iter()
            .find(|t| t.as_str() == token)
            .ok_or_else(|| ParseKindError {
                kind: "entity type",
                value: s.to_string(),
            })
    }
}

/// Typed predicate of a relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    InteractsWith,
    Regulates,
    Inhibits,
    Activates,
    BindsTo,
    LocatedIn,
    PartOf,
    Causes,
    Treats,
    AssociatedWith,
    SimilarTo,
    ExpressedIn,
    Metabolizes,
    Synthesizes,
}

impl Predicate {
    pub const ALL: [Predicate; 14] = [
        Predicate::InteractsWith,
        Predicate::Regulates,
        Predicate::Inhibits,
        Predicate::Activates,
        Predicate::BindsTo,
        Predicate::LocatedIn,
        Predicate::PartOf,
        Predicate::Causes,
        Predicate::Treats,
        Predicate::AssociatedWith,
        Predicate::SimilarTo,
        Predicate::ExpressedIn,
        Predicate::Metabolizes,
        Predicate::Synthesizes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Predicate::InteractsWith => "interacts_with",
            Predicate::Regulates => "regulates",
            Predicate::Inhibits => "inhibits",
            Predicate::Activates => "activates",
            Predicate::BindsTo => "binds_to",
            Predicate::LocatedIn => "located_in",
            Predicate::PartOf => "part_of",
            Predicate::Causes => "causes",
            Predicate::Treats => "treats",
            Predicate::AssociatedWith => "associated_with",
            Predicate::SimilarTo => "similar_to",
            Predicate::ExpressedIn => "expressed_in",
            Predicate::Metabolizes => "metabolizes",
            Predicate::Synthesizes => "synthesizes",
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Predicate {
    type Err = ParseKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = canonical_token(s);
        Predicate::ALL
            .into_iter()
            .find(|p| p.as_str() == token)
            .ok_or_else(|| ParseKindError {
                kind: "predicate",
                value: s.to_string(),
            })
    }
}

/// Whether a relationship may be traversed object→subject as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Bidirectional,
    #[default]
    Unidirectional,
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn default_confidence() -> f64 {
    0.5
}

fn default_strength() -> f64 {
    0.5
}

fn default_mention_count() -> u32 {
    1
}

/// How often an entity is mentioned in one paper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperMention {
    pub paper_id: PaperId,

    #[serde(default = "default_mention_count")]
    pub mention_count: u32,

    /// Sentences the entity was extracted from
    #[serde(default)]
    pub contexts: Vec<String>,
}

/// A typed, named scientific concept node in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: EntityId,

    /// Unique within a store
    pub name: String,

    #[serde(rename = "type")]
    pub entity_type: EntityType,

    #[serde(default)]
    pub aliases: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default = "default_confidence")]
    pub confidence: f64,

    #[serde(default)]
    pub papers: Vec<PaperMention>,

    #[serde(default)]
    pub verified: bool,
}

impl Entity {
    /// Create an entity with no aliases or paper mentions and default confidence.
    pub fn new(id: impl Into<EntityId>, name: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            entity_type,
            aliases: BTreeSet::new(),
            description: None,
            confidence: default_confidence(),
            papers: Vec::new(),
            verified: false,
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = clamp_unit(confidence);
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.insert(alias.into());
        self
    }

    pub fn with_mention(mut self, paper_id: impl Into<PaperId>, mention_count: u32) -> Self {
        self.papers.push(PaperMention {
            paper_id: paper_id.into(),
            mention_count,
            contexts: Vec::new(),
        });
        self
    }

    /// Number of papers mentioning this entity. This is the node size in views.
    pub fn paper_count(&self) -> usize {
        self.papers.len()
    }

    pub fn total_mentions(&self) -> u64 {
        self.papers.iter().map(|p| u64::from(p.mention_count)).sum()
    }

    /// Case-insensitive substring match against the name or any alias.
    ///
    /// `needle` must already be lowercase.
    pub fn matches_text(&self, needle: &str) -> bool {
        self.name.to_lowercase().contains(needle)
            || self
                .aliases
                .iter()
                .any(|alias| alias.to_lowercase().contains(needle))
    }

    /// Clamp scores into [0, 1] after deserialization.
    pub fn normalized(mut self) -> Self {
        self.confidence = clamp_unit(self.confidence);
        self
    }
}

/// Character span of an evidence sentence inside the paper text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: u32,
    pub end: u32,
}

/// A source reference backing a relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub paper_id: PaperId,

    #[serde(default)]
    pub sentence: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Span>,
}

/// A typed, confidence-scored edge between two entities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub subject: EntityId,
    pub predicate: Predicate,
    pub object: EntityId,
    pub confidence: f64,

    #[serde(default = "default_strength")]
    pub strength: f64,

    #[serde(default)]
    pub direction: Direction,

    #[serde(default)]
    pub evidence: Vec<Evidence>,

    #[serde(default)]
    pub verified: bool,
}

impl Relationship {
    /// Create a unidirectional relationship with default strength.
    ///
    /// `confidence` is clamped to [0, 1].
    pub fn new(
        id: impl Into<RelationshipId>,
        subject: impl Into<EntityId>,
        predicate: Predicate,
        object: impl Into<EntityId>,
        confidence: f64,
    ) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            predicate,
            object: object.into(),
            confidence: clamp_unit(confidence),
            strength: default_strength(),
            direction: Direction::default(),
            evidence: Vec::new(),
            verified: false,
        }
    }

    pub fn with_strength(mut self, strength: f64) -> Self {
        self.strength = clamp_unit(strength);
        self
    }

    pub fn bidirectional(mut self) -> Self {
        self.direction = Direction::Bidirectional;
        self
    }

    pub fn is_bidirectional(&self) -> bool {
        self.direction == Direction::Bidirectional
    }

    /// `confidence * strength`, the preference weight used when choosing
    /// between equally short paths.
    pub fn weight(&self) -> f64 {
        self.confidence * self.strength
    }

    /// The `(subject, predicate, object)` triple that must be unique per store.
    pub fn triple(&self) -> (&EntityId, Predicate, &EntityId) {
        (&self.subject, self.predicate, &self.object)
    }

    /// Clamp scores into [0, 1] after deserialization.
    pub fn normalized(mut self) -> Self {
        self.confidence = clamp_unit(self.confidence);
        self.strength = clamp_unit(self.strength);
        self
    }
}

/// Minimal paper record; the query engine only counts papers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    pub id: PaperId,

    #[serde(default)]
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_type_parsing_is_case_insensitive() {
        assert_eq!("PROTEIN".parse::<EntityType>(), Ok(EntityType::Protein));
        assert_eq!("cell-type".parse::<EntityType>(), Ok(EntityType::CellType));
        assert_eq!(" Cell_Type ".parse::<EntityType>(), Ok(EntityType::CellType));
        assert!("enzyme".parse::<EntityType>().is_err());
    }

    #[test]
    fn test_predicate_round_trips_through_display() {
        for predicate in Predicate::ALL {
            assert_eq!(predicate.to_string().parse::<Predicate>(), Ok(predicate));
        }
        assert_eq!("BINDS_TO".parse::<Predicate>(), Ok(Predicate::BindsTo));
    }

    #[test]
    fn test_scores_are_clamped() {
        let rel = Relationship::new("r1", "a", Predicate::Causes, "b", 1.7).with_strength(-0.2);
        assert_eq!(rel.confidence, 1.0);
        assert_eq!(rel.strength, 0.0);

        let entity = Entity::new("a", "A", EntityType::Gene).with_confidence(f64::NAN);
        assert_eq!(entity.confidence, 0.0);
    }

    #[test]
    fn test_deserialized_relationship_uses_defaults() {
        let json = r#"{"id":"r1","subject":"a","predicate":"inhibits","object":"b","confidence":0.8}"#;
        let rel: Relationship = serde_json::from_str(json).unwrap();
        assert_eq!(rel.strength, 0.5);
        assert_eq!(rel.direction, Direction::Unidirectional);
        assert!((rel.weight() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_entity_text_match_covers_aliases() {
        let entity = Entity::new("e1", "Tumor protein p53", EntityType::Protein)
            .with_alias("TP53")
            .with_mention("p1", 3)
            .with_mention("p2", 2);

        assert!(entity.matches_text("p53"));
        assert!(entity.matches_text("tp5"));
        assert!(!entity.matches_text("brca"));
        assert_eq!(entity.paper_count(), 2);
        assert_eq!(entity.total_mentions(), 5);
    }
}
