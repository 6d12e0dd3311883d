//! Graph query service.
//!
//! This module is the boundary callers talk to. It validates parameters,
//! drives the loader, the traversal algorithms and the formatter, and maps
//! everything into a small set of outcomes and errors.
//!
//! # Usage
//!
//! ```rust,no_run
//! use paper_knowledge_graph::query::{GraphQueries, GraphSearchQuery, KnowledgeGraphEngine, SearchOutcome};
//! use paper_knowledge_graph::storage::memory::InMemoryStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = InMemoryStore::new();
//! let engine = KnowledgeGraphEngine::new(store.clone(), store.clone(), store);
//!
//! let query = GraphSearchQuery::new("insulin").with_max_distance(1);
//! match engine.search_graph(&query).await? {
//!     SearchOutcome::Graph(view) => println!("{} nodes", view.nodes.len()),
//!     SearchOutcome::NoMatches => println!("No entities found"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Each call builds its own working graph and drops it afterwards, so one
//! engine can serve many concurrent tasks.

pub mod format;
pub mod seed;

use std::collections::BTreeSet;
use std::time::Instant;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::graph::{
    GraphLoader, PathFinder, PathOutcome, ReachOptions, SubgraphExpander, TraversalBudget,
};
use crate::models::{Entity, EntityId, EntityType};
use crate::storage::{EntityFilter, EntityStore, PaperStore, RelationshipStore, StorageError};

use format::{format_graph, GraphStats, ViewGraph};
use seed::SearchSeeder;

/// Errors that can occur during query processing.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Invalid query parameters, rejected before any store access
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// A path endpoint is not in the store
    #[error("Entity not found: {0}")]
    EntityNotFound(EntityId),

    /// Storage access failed
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Defaults and ceilings applied to caller-supplied parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryLimits {
    pub default_graph_limit: usize,
    pub max_graph_limit: usize,
    pub max_seeds: usize,
    pub default_max_distance: usize,
    pub max_distance_ceiling: usize,
    pub default_max_hops: usize,
    pub max_hops_ceiling: usize,

    /// Entities a single traversal may visit before it is cut short
    pub max_visited: usize,

    pub default_page_size: usize,
    pub max_page_size: usize,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            default_graph_limit: 100,
            max_graph_limit: 1_000,
            max_seeds: seed::DEFAULT_MAX_SEEDS,
            default_max_distance: 2,
            max_distance_ceiling: 5,
            default_max_hops: 5,
            max_hops_ceiling: 10,
            max_visited: 5_000,
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

/// Free-text neighborhood search.
#[derive(Debug, Clone, Default)]
pub struct GraphSearchQuery {
    pub query: String,

    /// Empty means every type
    pub entity_types: BTreeSet<EntityType>,

    /// Hops to expand around the seeds (default 2)
    pub max_distance: Option<i64>,

    pub deadline: Option<Instant>,
}

impl GraphSearchQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_types(mut self, types: impl IntoIterator<Item = EntityType>) -> Self {
        self.entity_types = types.into_iter().collect();
        self
    }

    pub fn with_max_distance(mut self, max_distance: i64) -> Self {
        self.max_distance = Some(max_distance);
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Shortest path between two entities.
#[derive(Debug, Clone)]
pub struct PathQuery {
    pub from: EntityId,
    pub to: EntityId,

    /// Upper bound on path length (default 5)
    pub max_hops: Option<i64>,

    pub deadline: Option<Instant>,
}

impl PathQuery {
    pub fn new(from: impl Into<EntityId>, to: impl Into<EntityId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            max_hops: None,
            deadline: None,
        }
    }

    pub fn with_max_hops(mut self, max_hops: i64) -> Self {
        self.max_hops = Some(max_hops);
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }
}

/// Paged entity listing.
#[derive(Debug, Clone, Default)]
pub struct EntityListQuery {
    pub entity_type: Option<EntityType>,
    pub search: Option<String>,

    /// 1-based page number (default 1)
    pub page: Option<i64>,

    /// Page size (default 20)
    pub limit: Option<i64>,
}

/// Result of [`GraphQueries::search_graph`].
#[derive(Debug, Clone, PartialEq)]
pub enum SearchOutcome {
    Graph(ViewGraph),

    /// Nothing matched the query text
    NoMatches,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Pagination {
    pub current: usize,
    pub pages: usize,
    pub total: usize,
}

/// One page of entities.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityPage {
    pub entities: Vec<Entity>,
    pub pagination: Pagination,
}

/// Parse entity type names, rejecting unknown ones.
///
/// # Errors
/// Returns `QueryError::InvalidQuery` naming the first unknown type
pub fn parse_entity_types<S: AsRef<str>>(names: &[S]) -> QueryResult<BTreeSet<EntityType>> {
    names
        .iter()
        .map(|name| {
            name.as_ref()
                .parse::<EntityType>()
                .map_err(|e| QueryError::InvalidQuery(e.to_string()))
        })
        .collect()
}

/// Validate an optional caller number against a lower bound and clamp it to
/// `ceiling`.
fn bounded(
    value: Option<i64>,
    name: &str,
    min: i64,
    default: usize,
    ceiling: usize,
) -> QueryResult<usize> {
    match value {
        None => Ok(default.min(ceiling)),
        Some(v) if v < min => Err(QueryError::InvalidQuery(format!(
            "{name} must be at least {min}, got {v}"
        ))),
        Some(v) => Ok(usize::try_from(v).unwrap_or(usize::MAX).min(ceiling)),
    }
}

/// Query operations over the knowledge graph.
#[async_trait]
pub trait GraphQueries: Send + Sync {
    /// Overview of the best-connected entities with store-wide stats.
    ///
    /// # Errors
    /// `InvalidQuery` for a limit below 1, `Storage` if a store fails
    async fn get_graph(&self, limit: Option<i64>) -> QueryResult<ViewGraph>;

    /// Seed from free text and expand `max_distance` hops around the seeds.
    ///
    /// # Errors
    /// `InvalidQuery` for a blank query or negative distance, `Storage` if a
    /// store fails
    async fn search_graph(&self, query: &GraphSearchQuery) -> QueryResult<SearchOutcome>;

    /// Minimum-hop path between two stored entities.
    ///
    /// # Errors
    /// `InvalidQuery` for `max_hops < 1`, `EntityNotFound` if an endpoint is
    /// missing (checked before any traversal), `Storage` if a store fails
    async fn find_shortest_path(&self, query: &PathQuery) -> QueryResult<PathOutcome>;

    /// Page through entities, best-connected first.
    ///
    /// # Errors
    /// `InvalidQuery` for a page or limit below 1, `Storage` if a store fails
    async fn list_entities(&self, query: &EntityListQuery) -> QueryResult<EntityPage>;
}

/// Default [`GraphQueries`] implementation over injected store handles.
pub struct KnowledgeGraphEngine<E, R, P>
where
    E: EntityStore,
    R: RelationshipStore,
    P: PaperStore,
{
    entities: E,
    relationships: R,
    papers: P,
    limits: QueryLimits,
}

impl<E, R, P> KnowledgeGraphEngine<E, R, P>
where
    E: EntityStore,
    R: RelationshipStore,
    P: PaperStore,
{
    /// Create an engine with default [`QueryLimits`].
    ///
    /// # Arguments
    /// * `entities` - Entity store handle
    /// * `relationships` - Relationship store handle
    /// * `papers` - Paper store handle, used for stats only
    pub fn new(entities: E, relationships: R, papers: P) -> Self {
        Self::with_limits(entities, relationships, papers, QueryLimits::default())
    }

    pub fn with_limits(entities: E, relationships: R, papers: P, limits: QueryLimits) -> Self {
        Self {
            entities,
            relationships,
            papers,
            limits,
        }
    }

    pub fn limits(&self) -> &QueryLimits {
        &self.limits
    }

    fn loader(&self) -> GraphLoader<'_, E, R> {
        let ceiling = self.limits.max_visited.max(self.limits.max_graph_limit);
        GraphLoader::new(&self.entities, &self.relationships, ceiling)
    }

    fn budget(&self, deadline: Option<Instant>) -> TraversalBudget {
        TraversalBudget::new(self.limits.max_visited).with_deadline(deadline)
    }

    /// Store-wide totals.
    ///
    /// # Errors
    /// Propagates the first store failure
    pub async fn stats(&self) -> QueryResult<GraphStats> {
        let (total_entities, total_relationships, total_papers) = tokio::try_join!(
            self.entities.count_all(),
            self.relationships.count_all(),
            self.papers.count_all(),
        )?;
        Ok(GraphStats {
            total_entities,
            total_relationships,
            total_papers,
        })
    }
}

#[async_trait]
impl<E, R, P> GraphQueries for KnowledgeGraphEngine<E, R, P>
where
    E: EntityStore,
    R: RelationshipStore,
    P: PaperStore,
{
    async fn get_graph(&self, limit: Option<i64>) -> QueryResult<ViewGraph> {
        let limit = bounded(
            limit,
            "limit",
            1,
            self.limits.default_graph_limit,
            self.limits.max_graph_limit,
        )?;

        let graph = self.loader().load_top(limit).await?;
        let stats = self.stats().await?;
        info!(
            limit,
            nodes = graph.entity_count(),
            links = graph.relationship_count(),
            "served graph overview"
        );
        Ok(format_graph(&graph, Some(stats)))
    }

    async fn search_graph(&self, query: &GraphSearchQuery) -> QueryResult<SearchOutcome> {
        let max_distance = bounded(
            query.max_distance,
            "maxDistance",
            0,
            self.limits.default_max_distance,
            self.limits.max_distance_ceiling,
        )?;

        let seeder = SearchSeeder::new(&self.entities, self.limits.max_seeds);
        let seeds: BTreeSet<EntityId> = seeder
            .seed(&query.query, &query.entity_types)
            .await?
            .into_iter()
            .collect();
        if seeds.is_empty() {
            info!(query = %query.query, "no entities matched search");
            return Ok(SearchOutcome::NoMatches);
        }

        let budget = self.budget(query.deadline);
        let options = ReachOptions {
            radius: max_distance,
            target: None,
            budget,
        };
        let graph = self.loader().load_reachable(&seeds, &options).await?;
        let expansion = SubgraphExpander::new(&graph, budget).expand(&seeds, max_distance);

        info!(
            query = %query.query,
            seeds = seeds.len(),
            max_distance,
            nodes = expansion.graph.entity_count(),
            truncated = expansion.truncated,
            "served graph search"
        );
        Ok(SearchOutcome::Graph(format_graph(&expansion.graph, None)))
    }

    async fn find_shortest_path(&self, query: &PathQuery) -> QueryResult<PathOutcome> {
        if query.from.as_str().trim().is_empty() || query.to.as_str().trim().is_empty() {
            return Err(QueryError::InvalidQuery(
                "both from and to are required".to_string(),
            ));
        }
        let max_hops = bounded(
            query.max_hops,
            "maxHops",
            1,
            self.limits.default_max_hops,
            self.limits.max_hops_ceiling,
        )?;

        let endpoints: BTreeSet<EntityId> = [query.from.clone(), query.to.clone()].into();
        let found: BTreeSet<EntityId> = self
            .entities
            .fetch_by_ids(&endpoints)
            .await?
            .into_iter()
            .map(|e| e.id)
            .collect();
        for endpoint in [&query.from, &query.to] {
            if !found.contains(endpoint) {
                debug!(entity = %endpoint, "path endpoint not found");
                return Err(QueryError::EntityNotFound(endpoint.clone()));
            }
        }

        let budget = self.budget(query.deadline);
        let options = ReachOptions {
            radius: max_hops,
            target: Some(query.to.clone()),
            budget,
        };
        let start: BTreeSet<EntityId> = [query.from.clone()].into();
        let graph = self.loader().load_reachable(&start, &options).await?;
        let outcome = PathFinder::new(&graph, budget).find(&query.from, &query.to, max_hops);

        match &outcome {
            PathOutcome::Found(path) => info!(
                from = %query.from,
                to = %query.to,
                hops = path.hops(),
                "served shortest path"
            ),
            PathOutcome::NoPath { truncated } => info!(
                from = %query.from,
                to = %query.to,
                max_hops,
                truncated = *truncated,
                "no path found"
            ),
        }
        Ok(outcome)
    }

    async fn list_entities(&self, query: &EntityListQuery) -> QueryResult<EntityPage> {
        let page = bounded(query.page, "page", 1, 1, usize::MAX)?;
        let limit = bounded(
            query.limit,
            "limit",
            1,
            self.limits.default_page_size,
            self.limits.max_page_size,
        )?;

        let filter = EntityFilter {
            entity_type: query.entity_type,
            search: query
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        };
        let total = self.entities.count_matching(&filter).await?;
        let offset = (page - 1).saturating_mul(limit);
        let entities = self.entities.list(&filter, offset, limit).await?;

        debug!(page, limit, total, returned = entities.len(), "listed entities");
        Ok(EntityPage {
            entities,
            pagination: Pagination {
                current: page,
                pages: total.div_ceil(limit),
                total,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Orientation;
    use crate::models::{Paper, PaperId, Predicate, Relationship};
    use crate::storage::memory::InMemoryStore;
    use crate::storage::StorageResult;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    type MemoryEngine = KnowledgeGraphEngine<InMemoryStore, InMemoryStore, InMemoryStore>;

    fn engine_over(store: InMemoryStore) -> MemoryEngine {
        KnowledgeGraphEngine::new(store.clone(), store.clone(), store)
    }

    fn add_entity(store: &InMemoryStore, id: &str, name: &str, ty: EntityType, papers: usize) {
        let mut entity = Entity::new(id, name, ty);
        for p in 0..papers {
            entity = entity.with_mention(format!("p{p}"), 1);
        }
        store.insert_entity(entity).unwrap();
    }

    fn add_rel(store: &InMemoryStore, rel: Relationship) {
        store.insert_relationship(rel).unwrap();
    }

    /// A, B, C triangle of bidirectional edges with different confidences.
    fn triangle() -> InMemoryStore {
        let store = InMemoryStore::new();
        add_entity(&store, "A", "Alpha", EntityType::Protein, 3);
        add_entity(&store, "B", "Beta", EntityType::Protein, 2);
        add_entity(&store, "C", "Gamma", EntityType::Gene, 1);
        add_rel(&store, Relationship::new("ab", "A", Predicate::BindsTo, "B", 0.9).bidirectional());
        add_rel(&store, Relationship::new("ac", "A", Predicate::Regulates, "C", 0.3).bidirectional());
        add_rel(&store, Relationship::new("bc", "B", Predicate::Activates, "C", 0.5).bidirectional());
        store
            .insert_paper(Paper {
                id: PaperId::from("p0"),
                title: "First".to_string(),
            })
            .unwrap();
        store
    }

    fn path_ids(outcome: &PathOutcome) -> Vec<String> {
        outcome
            .path()
            .expect("expected a path")
            .entities
            .iter()
            .map(|e| e.id.to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_direct_edge_preferred() {
        let engine = engine_over(triangle());
        let query = PathQuery::new("A", "C").with_max_hops(2);
        let outcome = engine.find_shortest_path(&query).await.unwrap();

        assert_eq!(path_ids(&outcome), vec!["A", "C"]);
        assert_eq!(outcome.path().unwrap().hops(), 1);
    }

    #[tokio::test]
    async fn test_bidirectional_relationship_both_ways() {
        let store = InMemoryStore::new();
        add_entity(&store, "X", "Xeno", EntityType::Drug, 0);
        add_entity(&store, "Y", "Ypsilon", EntityType::Disease, 0);
        add_rel(&store, Relationship::new("xy", "X", Predicate::Treats, "Y", 0.8).bidirectional());
        let engine = engine_over(store);

        let forward = engine
            .find_shortest_path(&PathQuery::new("X", "Y"))
            .await
            .unwrap();
        let backward = engine
            .find_shortest_path(&PathQuery::new("Y", "X"))
            .await
            .unwrap();

        assert_eq!(path_ids(&forward), vec!["X", "Y"]);
        assert_eq!(path_ids(&backward), vec!["Y", "X"]);
        assert_eq!(
            backward.path().unwrap().steps[0].orientation,
            Orientation::Reverse
        );
    }

    /// Relationship store that counts every call it receives.
    struct CountingRelationships {
        inner: InMemoryStore,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RelationshipStore for CountingRelationships {
        async fn fetch_by_endpoints(
            &self,
            ids: &BTreeSet<EntityId>,
        ) -> StorageResult<Vec<Relationship>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch_by_endpoints(ids).await
        }

        async fn fetch_incident(&self, ids: &BTreeSet<EntityId>) -> StorageResult<Vec<Relationship>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.fetch_incident(ids).await
        }

        async fn count_all(&self) -> StorageResult<usize> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            RelationshipStore::count_all(&self.inner).await
        }
    }

    #[tokio::test]
    async fn test_missing_endpoint_fails_without_traversal() {
        let store = triangle();
        let relationships = CountingRelationships {
            inner: store.clone(),
            calls: AtomicUsize::new(0),
        };
        let engine = KnowledgeGraphEngine::new(store.clone(), relationships, store);

        let result = engine
            .find_shortest_path(&PathQuery::new("missing", "B").with_max_hops(5))
            .await;
        match result {
            Err(QueryError::EntityNotFound(id)) => assert_eq!(id.as_str(), "missing"),
            other => panic!("expected EntityNotFound, got {other:?}"),
        }

        let result = engine.find_shortest_path(&PathQuery::new("A", "nowhere")).await;
        assert!(matches!(result, Err(QueryError::EntityNotFound(id)) if id.as_str() == "nowhere"));

        assert_eq!(engine.relationships.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_search_rejected() {
        let engine = engine_over(triangle());
        let query = GraphSearchQuery::new("").with_max_distance(2);
        let result = engine.search_graph(&query).await;
        assert!(matches!(result, Err(QueryError::InvalidQuery(_))));
    }

    #[tokio::test]
    async fn test_parameter_validation() {
        let engine = engine_over(triangle());

        let negative = GraphSearchQuery::new("alpha").with_max_distance(-1);
        assert!(matches!(
            engine.search_graph(&negative).await,
            Err(QueryError::InvalidQuery(_))
        ));

        let zero_hops = PathQuery::new("A", "B").with_max_hops(0);
        assert!(matches!(
            engine.find_shortest_path(&zero_hops).await,
            Err(QueryError::InvalidQuery(_))
        ));

        assert!(matches!(
            engine.get_graph(Some(0)).await,
            Err(QueryError::InvalidQuery(_))
        ));

        let page_zero = EntityListQuery {
            page: Some(0),
            ..EntityListQuery::default()
        };
        assert!(matches!(
            engine.list_entities(&page_zero).await,
            Err(QueryError::InvalidQuery(_))
        ));
    }

    #[test]
    fn test_parse_entity_types() {
        let types = parse_entity_types(&["PROTEIN", "cell-type"]).unwrap();
        assert!(types.contains(&EntityType::Protein));
        assert!(types.contains(&EntityType::CellType));
        assert!(matches!(
            parse_entity_types(&["enzyme"]),
            Err(QueryError::InvalidQuery(_))
        ));
    }

    #[tokio::test]
    async fn test_get_graph_with_stats() {
        let engine = engine_over(triangle());
        let view = engine.get_graph(Some(2)).await.unwrap();

        let ids: Vec<&str> = view.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(view.links.len(), 1);
        assert_eq!(
            view.stats,
            Some(GraphStats {
                total_entities: 3,
                total_relationships: 3,
                total_papers: 1,
            })
        );
    }

    #[tokio::test]
    async fn test_search_expands_around_seeds() {
        let store = triangle();
        add_entity(&store, "D", "Delta", EntityType::Disease, 0);
        add_rel(&store, Relationship::new("cd", "C", Predicate::Causes, "D", 0.7));
        let engine = engine_over(store);

        let zero = engine
            .search_graph(&GraphSearchQuery::new("gamma").with_max_distance(0))
            .await
            .unwrap();
        let SearchOutcome::Graph(view) = zero else {
            panic!("expected a graph");
        };
        assert_eq!(view.nodes.len(), 1);
        assert!(view.links.is_empty());
        assert!(view.stats.is_none());

        let one = engine
            .search_graph(&GraphSearchQuery::new("gamma").with_max_distance(1))
            .await
            .unwrap();
        let SearchOutcome::Graph(view) = one else {
            panic!("expected a graph");
        };
        let ids: Vec<&str> = view.nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B", "C", "D"]);
        assert_eq!(view.links.len(), 4);
    }

    #[tokio::test]
    async fn test_search_type_filter_and_no_matches() {
        let engine = engine_over(triangle());

        let genes_only = GraphSearchQuery::new("alpha")
            .with_types([EntityType::Gene])
            .with_max_distance(1);
        assert_eq!(
            engine.search_graph(&genes_only).await.unwrap(),
            SearchOutcome::NoMatches
        );

        let nothing = GraphSearchQuery::new("kinase");
        assert_eq!(
            engine.search_graph(&nothing).await.unwrap(),
            SearchOutcome::NoMatches
        );
    }

    #[tokio::test]
    async fn test_path_to_self_and_no_path() {
        let store = triangle();
        add_entity(&store, "Z", "Zeta", EntityType::Other, 0);
        let engine = engine_over(store);

        let same = engine.find_shortest_path(&PathQuery::new("A", "A")).await.unwrap();
        assert_eq!(same.path().unwrap().hops(), 0);

        let none = engine.find_shortest_path(&PathQuery::new("A", "Z")).await.unwrap();
        assert_eq!(none, PathOutcome::NoPath { truncated: false });
    }

    #[tokio::test]
    async fn test_visited_cap_reported_as_truncation() {
        let store = InMemoryStore::new();
        for i in 0..6 {
            add_entity(&store, &format!("n{i}"), &format!("Node {i}"), EntityType::Concept, 0);
        }
        for i in 0..5 {
            add_rel(
                &store,
                Relationship::new(
                    format!("r{i}"),
                    format!("n{i}"),
                    Predicate::PartOf,
                    format!("n{}", i + 1),
                    0.5,
                ),
            );
        }
        let limits = QueryLimits {
            max_visited: 3,
            ..QueryLimits::default()
        };
        let engine =
            KnowledgeGraphEngine::with_limits(store.clone(), store.clone(), store, limits);

        let outcome = engine
            .find_shortest_path(&PathQuery::new("n0", "n5").with_max_hops(10))
            .await
            .unwrap();
        assert_eq!(outcome, PathOutcome::NoPath { truncated: true });
    }

    #[tokio::test]
    async fn test_search_visited_cap_returns_partial_graph() {
        let store = InMemoryStore::new();
        for i in 0..6 {
            add_entity(&store, &format!("n{i}"), &format!("Node {i}"), EntityType::Concept, 0);
        }
        for i in 0..5 {
            add_rel(
                &store,
                Relationship::new(
                    format!("r{i}"),
                    format!("n{i}"),
                    Predicate::PartOf,
                    format!("n{}", i + 1),
                    0.5,
                ),
            );
        }
        let limits = QueryLimits {
            max_visited: 3,
            ..QueryLimits::default()
        };
        let engine =
            KnowledgeGraphEngine::with_limits(store.clone(), store.clone(), store, limits);

        let outcome = engine
            .search_graph(&GraphSearchQuery::new("Node 0").with_max_distance(5))
            .await
            .unwrap();
        let SearchOutcome::Graph(view) = outcome else {
            panic!("expected a graph, got {outcome:?}");
        };
        assert!(view.truncated);
        assert!(view.nodes.len() <= 3);
        assert!(view.nodes.iter().any(|n| n.id.as_str() == "n0"));
    }

    #[tokio::test]
    async fn test_list_entities_pagination() {
        let engine = engine_over(triangle());

        let first = engine
            .list_entities(&EntityListQuery {
                limit: Some(2),
                ..EntityListQuery::default()
            })
            .await
            .unwrap();
        let ids: Vec<&str> = first.entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["A", "B"]);
        assert_eq!(
            first.pagination,
            Pagination {
                current: 1,
                pages: 2,
                total: 3,
            }
        );

        let second = engine
            .list_entities(&EntityListQuery {
                page: Some(2),
                limit: Some(2),
                ..EntityListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(second.entities.len(), 1);
        assert_eq!(second.entities[0].id.as_str(), "C");

        let proteins = engine
            .list_entities(&EntityListQuery {
                entity_type: Some(EntityType::Protein),
                search: Some("  bet ".to_string()),
                ..EntityListQuery::default()
            })
            .await
            .unwrap();
        assert_eq!(proteins.pagination.total, 1);
        assert_eq!(proteins.entities[0].id.as_str(), "B");
    }

    /// Entity store whose backend is down.
    struct UnavailableEntities;

    #[async_trait]
    impl EntityStore for UnavailableEntities {
        async fn fetch_by_ids(&self, _ids: &BTreeSet<EntityId>) -> StorageResult<Vec<Entity>> {
            Err(StorageError::Unavailable("connection refused".to_string()))
        }

        async fn fetch_top_by_connections(&self, _limit: usize) -> StorageResult<Vec<Entity>> {
            Err(StorageError::Unavailable("connection refused".to_string()))
        }

        async fn search_by_name_or_alias(
            &self,
            _query: &str,
            _types: &BTreeSet<EntityType>,
        ) -> StorageResult<Vec<Entity>> {
            Err(StorageError::Unavailable("connection refused".to_string()))
        }

        async fn list(
            &self,
            _filter: &EntityFilter,
            _offset: usize,
            _limit: usize,
        ) -> StorageResult<Vec<Entity>> {
            Err(StorageError::Unavailable("connection refused".to_string()))
        }

        async fn count_matching(&self, _filter: &EntityFilter) -> StorageResult<usize> {
            Err(StorageError::Unavailable("connection refused".to_string()))
        }

        async fn count_all(&self) -> StorageResult<usize> {
            Err(StorageError::Unavailable("connection refused".to_string()))
        }
    }

    #[tokio::test]
    async fn test_store_unavailable_propagates() {
        let store = triangle();
        let engine = KnowledgeGraphEngine::new(UnavailableEntities, store.clone(), store);

        let result = engine.find_shortest_path(&PathQuery::new("A", "B")).await;
        assert!(matches!(
            result,
            Err(QueryError::Storage(StorageError::Unavailable(_)))
        ));

        let result = engine.get_graph(None).await;
        assert!(matches!(
            result,
            Err(QueryError::Storage(StorageError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_queries_agree() {
        let engine = Arc::new(engine_over(triangle()));
        let expected = engine
            .find_shortest_path(&PathQuery::new("B", "C"))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let engine = Arc::clone(&engine);
            handles.push(tokio::spawn(async move {
                engine.find_shortest_path(&PathQuery::new("B", "C")).await
            }));
        }
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert_eq!(outcome, expected);
        }
    }
}
