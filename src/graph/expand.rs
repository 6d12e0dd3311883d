//! Bounded multi-source neighborhood expansion.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use super::{TraversalBudget, WorkingGraph};
use crate::models::EntityId;

/// Result of [`SubgraphExpander::expand`].
#[derive(Debug, Clone)]
pub struct Expansion {
    /// Induced subgraph on the included entities
    pub graph: WorkingGraph,

    /// Hop distance from each included entity to its nearest seed
    pub distances: BTreeMap<EntityId, usize>,

    /// Set when the visited cap or deadline stopped expansion early
    pub truncated: bool,
}

/// Multi-source breadth-first expansion over a [`WorkingGraph`].
///
/// Seeds sit at distance 0. An entity's distance is the fewest traversable
/// hops from any seed. The result holds every entity with distance at most
/// `max_distance` and every relationship whose endpoints are both held, so
/// raising `max_distance` never removes anything.
pub struct SubgraphExpander<'g> {
    graph: &'g WorkingGraph,
    budget: TraversalBudget,
}

impl<'g> SubgraphExpander<'g> {
    pub fn new(graph: &'g WorkingGraph, budget: TraversalBudget) -> Self {
        Self { graph, budget }
    }

    /// Expand from `seeds` out to `max_distance` hops.
    ///
    /// Seeds that are not in the graph are ignored.
    pub fn expand(&self, seeds: &BTreeSet<EntityId>, max_distance: usize) -> Expansion {
        let mut distances: BTreeMap<EntityId, usize> = BTreeMap::new();
        let mut truncated = self.graph.is_truncated();

        let mut frontier: Vec<EntityId> = Vec::new();
        for seed in seeds.iter().filter(|s| self.graph.contains(s)) {
            if distances.len() >= self.budget.max_visited {
                truncated = true;
                break;
            }
            distances.insert(seed.clone(), 0);
            frontier.push(seed.clone());
        }

        'levels: for depth in 1..=max_distance {
            if frontier.is_empty() {
                break;
            }
            if self.budget.expired() {
                debug!(depth, "deadline reached during expansion");
                truncated = true;
                break;
            }

            let mut next = Vec::new();
            for current in &frontier {
                for hop in self.graph.outgoing(current) {
                    if distances.contains_key(&hop.neighbor) {
                        continue;
                    }
                    if distances.len() >= self.budget.max_visited {
                        debug!(depth, visited = distances.len(), "visited cap reached during expansion");
                        truncated = true;
                        break 'levels;
                    }
                    distances.insert(hop.neighbor.clone(), depth);
                    next.push(hop.neighbor.clone());
                }
            }
            frontier = next;
        }

        let included: BTreeSet<EntityId> = distances.keys().cloned().collect();
        let mut graph = self.graph.subgraph(&included);
        if truncated {
            graph.mark_truncated();
        }

        Expansion {
            graph,
            distances,
            truncated,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_support::{graph, rel};
    use crate::models::RelationshipId;

    fn ids(values: &[&str]) -> BTreeSet<EntityId> {
        values.iter().map(|v| EntityId::from(*v)).collect()
    }

    /// s1 - a - b - c chain with s2 hanging off b, all bidirectional, plus
    /// a one-way edge c -> d and an edge s1 -> s2.
    fn sample() -> WorkingGraph {
        graph(
            &["s1", "s2", "a", "b", "c", "d"],
            vec![
                rel("r1", "s1", "a", 0.5).bidirectional(),
                rel("r2", "a", "b", 0.5).bidirectional(),
                rel("r3", "b", "c", 0.5).bidirectional(),
                rel("r4", "s2", "b", 0.5).bidirectional(),
                rel("r5", "c", "d", 0.5),
                rel("r6", "s1", "s2", 0.5),
            ],
        )
    }

    fn expand(g: &WorkingGraph, seeds: &[&str], max_distance: usize) -> Expansion {
        SubgraphExpander::new(g, TraversalBudget::new(1_000)).expand(&ids(seeds), max_distance)
    }

    #[test]
    fn test_zero_distance_is_seeds_only() {
        let g = sample();
        let result = expand(&g, &["s1", "s2"], 0);

        assert_eq!(result.graph.entity_ids(), ids(&["s1", "s2"]));
        let rels: Vec<&str> = result.graph.relationships().map(|r| r.id.as_str()).collect();
        assert_eq!(rels, vec!["r6"]);
        assert!(!result.truncated);
    }

    #[test]
    fn test_distance_is_to_nearest_seed() {
        let g = sample();
        let result = expand(&g, &["s1", "s2"], 5);

        assert_eq!(result.distances[&EntityId::from("a")], 1);
        assert_eq!(result.distances[&EntityId::from("b")], 1);
        assert_eq!(result.distances[&EntityId::from("c")], 2);
        assert_eq!(result.distances[&EntityId::from("d")], 3);
    }

    #[test]
    fn test_expansion_is_monotonic() {
        let g = sample();
        let mut previous_nodes = BTreeSet::new();
        let mut previous_rels: BTreeSet<RelationshipId> = BTreeSet::new();

        for max_distance in 0..6 {
            let result = expand(&g, &["s1"], max_distance);
            let nodes = result.graph.entity_ids();
            let rels: BTreeSet<RelationshipId> =
                result.graph.relationships().map(|r| r.id.clone()).collect();

            assert!(previous_nodes.is_subset(&nodes));
            assert!(previous_rels.is_subset(&rels));
            previous_nodes = nodes;
            previous_rels = rels;
        }
        assert_eq!(previous_nodes.len(), 6);
    }

    #[test]
    fn test_relationship_included_iff_both_endpoints() {
        let g = sample();
        let result = expand(&g, &["s1"], 1);

        // s1 reaches a and s2 in one hop; r4 (s2-b) must be left out.
        assert_eq!(result.graph.entity_ids(), ids(&["a", "s1", "s2"]));
        let rels: Vec<&str> = result.graph.relationships().map(|r| r.id.as_str()).collect();
        assert_eq!(rels, vec!["r1", "r6"]);
    }

    #[test]
    fn test_one_way_edges_not_walked_backwards() {
        let g = sample();
        let result = expand(&g, &["d"], 3);
        assert_eq!(result.graph.entity_ids(), ids(&["d"]));
    }

    #[test]
    fn test_unknown_seeds_ignored() {
        let g = sample();
        let result = expand(&g, &["ghost"], 2);
        assert_eq!(result.graph.entity_count(), 0);
        assert!(!result.truncated);
    }

    #[test]
    fn test_visited_cap_truncates() {
        let g = sample();
        let result = SubgraphExpander::new(&g, TraversalBudget::new(3)).expand(&ids(&["s1"]), 5);

        assert!(result.truncated);
        assert!(result.graph.is_truncated());
        assert_eq!(result.graph.entity_count(), 3);
    }

    #[test]
    fn test_expired_deadline_keeps_seeds() {
        let g = sample();
        let budget = TraversalBudget::new(1_000).with_deadline(Some(std::time::Instant::now()));
        let result = SubgraphExpander::new(&g, budget).expand(&ids(&["s1"]), 5);

        assert!(result.truncated);
        assert_eq!(result.graph.entity_ids(), ids(&["s1"]));
    }
}
