//! Free-text seed resolution.
//!
//! Turns a user query plus optional type filter into a short, ranked list of
//! entity ids that graph expansion starts from.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use tracing::debug;

use super::{QueryError, QueryResult};
use crate::models::{Entity, EntityId, EntityType};
use crate::storage::{compare_by_connections, EntityStore};

/// Default maximum number of seeds returned for one query.
pub const DEFAULT_MAX_SEEDS: usize = 50;

/// How well an entity matches the query text. Lower is better.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MatchRank {
    ExactName,
    NamePrefix,
    NameContains,
    Alias,
}

fn match_rank(entity: &Entity, needle: &str) -> Option<MatchRank> {
    let name = entity.name.to_lowercase();
    if name == needle {
        Some(MatchRank::ExactName)
    } else if name.starts_with(needle) {
        Some(MatchRank::NamePrefix)
    } else if name.contains(needle) {
        Some(MatchRank::NameContains)
    } else if entity.matches_text(needle) {
        Some(MatchRank::Alias)
    } else {
        None
    }
}

/// Resolves query text into seed entity ids through the store's text index.
pub struct SearchSeeder<'a, E: EntityStore + ?Sized> {
    store: &'a E,
    max_seeds: usize,
}

impl<'a, E: EntityStore + ?Sized> SearchSeeder<'a, E> {
    pub fn new(store: &'a E, max_seeds: usize) -> Self {
        Self {
            store,
            max_seeds: max_seeds.max(1),
        }
    }

    /// Find up to `max_seeds` entities whose name or alias contains `query`.
    ///
    /// Exact name matches rank first, then name prefixes, then other name
    /// matches, then alias-only matches; ties go to the better-connected
    /// entity. An empty list means nothing matched.
    ///
    /// # Errors
    /// Returns `QueryError::InvalidQuery` for a blank query (before the store
    /// is touched) and `QueryError::Storage` if the store fails
    pub async fn seed(
        &self,
        query: &str,
        types: &BTreeSet<EntityType>,
    ) -> QueryResult<Vec<EntityId>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(QueryError::InvalidQuery("query is required".to_string()));
        }

        let needle = query.to_lowercase();
        let candidates = self.store.search_by_name_or_alias(query, types).await?;

        let mut ranked: Vec<(MatchRank, Entity)> = candidates
            .into_iter()
            .filter(|e| types.is_empty() || types.contains(&e.entity_type))
            .filter_map(|e| match_rank(&e, &needle).map(|rank| (rank, e)))
            .collect();
        ranked.sort_by(|(ra, a), (rb, b)| match ra.cmp(rb) {
            Ordering::Equal => compare_by_connections(a, b),
            other => other,
        });
        ranked.truncate(self.max_seeds);

        debug!(query, seeds = ranked.len(), "resolved search seeds");
        Ok(ranked.into_iter().map(|(_, e)| e.id).collect())
    }
}
