//! Graph server binary entry point.
//!
//! This binary loads a knowledge-graph snapshot and serves graph queries as
//! newline-delimited JSON on stdin/stdout. Logs go to stderr so they never
//! mix with responses.
//!
//! ```bash
//! echo '{"id":1,"method":"get_graph","params":{"limit":20}}' | kg-server --snapshot graph.json
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use paper_knowledge_graph::{
    query::{KnowledgeGraphEngine, QueryLimits},
    server::{GraphServer, ServerConfig},
    snapshot::{json::JsonSnapshotProvider, load_store},
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Serve knowledge-graph queries over stdio
#[derive(Parser, Debug)]
#[command(name = "kg-server", version, about = "Serve knowledge-graph queries as JSON lines on stdio")]
struct Args {
    /// Snapshot file (JSON)
    #[arg(long, value_name = "PATH")]
    snapshot: PathBuf,

    /// Maximum number of requests handled at once
    #[arg(long, value_name = "N", default_value_t = ServerConfig::default().max_concurrent_requests)]
    max_concurrent_requests: usize,

    /// Per-request time budget in seconds
    #[arg(long, value_name = "SECS", default_value_t = ServerConfig::default().request_timeout_secs)]
    request_timeout_secs: u64,

    /// Maximum entities one traversal may visit
    #[arg(long, value_name = "N", default_value_t = QueryLimits::default().max_visited)]
    max_visited: usize,

    /// Logging verbosity level
    #[arg(long, default_value = "info", value_name = "LEVEL")]
    log_level: String,
}

/// Setup logging with the specified level
fn setup_logging(log_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level);

    info!("Loading snapshot from: {}", args.snapshot.display());
    let provider = JsonSnapshotProvider::from_file(&args.snapshot);
    let (store, _stats) = load_store(&provider)
        .await
        .with_context(|| format!("Failed to load snapshot {}", args.snapshot.display()))?;

    let limits = QueryLimits {
        max_visited: args.max_visited.max(1),
        ..QueryLimits::default()
    };
    let engine = KnowledgeGraphEngine::with_limits(store.clone(), store.clone(), store, limits);

    let config = ServerConfig {
        max_concurrent_requests: args.max_concurrent_requests.max(1),
        request_timeout_secs: args.request_timeout_secs,
    };
    let server = Arc::new(GraphServer::new(engine, config));

    server
        .run_stdio()
        .await
        .context("Server stopped with an error")?;
    Ok(())
}
