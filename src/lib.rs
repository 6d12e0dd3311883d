//! Paper Knowledge Graph - query engine over entities and relationships
//! extracted from scientific papers.
//!
//! This library answers graph questions over a read-only snapshot of typed
//! entities (proteins, genes, diseases, ...) and typed, confidence-scored
//! relationships between them.
//!
//! # Architecture
//!
//! The system is organized into several key modules:
//!
//! - **models**: Core data structures (Entity, Relationship, closed type and predicate enums)
//! - **storage**: Store traits and the in-memory snapshot store
//! - **snapshot**: Loading store snapshots from JSON
//! - **graph**: Per-query working graph, loader, shortest path and bounded expansion
//! - **query**: Query service boundary, search seeding and result formatting
//! - **server**: JSON request/response handling and the stdio server loop
//!
//! # Workflow
//!
//! 1. Validate caller parameters and clamp them to the configured limits
//! 2. Resolve seeds (free-text search) or endpoints (path search) in the store
//! 3. Load a bounded working graph around them
//! 4. Run breadth-first shortest path or multi-source expansion
//! 5. Shape the result into nodes, links and path views
//!
//! # Example
//!
//! ```ignore
//! use paper_knowledge_graph::{
//!     query::{GraphQueries, KnowledgeGraphEngine, PathQuery},
//!     snapshot::{json::JsonSnapshotProvider, load_store},
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = JsonSnapshotProvider::from_file("graph.json");
//!     let (store, _stats) = load_store(&provider).await?;
//!     let engine = KnowledgeGraphEngine::new(store.clone(), store.clone(), store);
//!
//!     let outcome = engine
//!         .find_shortest_path(&PathQuery::new("e1", "e9").with_max_hops(4))
//!         .await?;
//!     if let Some(path) = outcome.path() {
//!         println!("{} hops, strength {:.3}", path.hops(), path.strength());
//!     }
//!
//!     Ok(())
//! }
//! ```

// Public modules
pub mod graph;
pub mod models;
pub mod query;
pub mod server;
pub mod snapshot;
pub mod storage;

// Re-export commonly used types at the crate root
pub use graph::{Path, PathOutcome, WorkingGraph};
pub use models::{Entity, EntityId, EntityType, Predicate, Relationship};
pub use query::{GraphQueries, KnowledgeGraphEngine, QueryError, QueryLimits};
pub use storage::{EntityStore, PaperStore, RelationshipStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
