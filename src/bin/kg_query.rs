//! Query binary entry point.
//!
//! This binary loads a knowledge-graph snapshot and answers graph queries
//! from the command line. It supports one-shot subcommands and an
//! interactive REPL mode, with table or JSON output.
//!
//! # Examples
//!
//! Graph overview:
//! ```bash
//! kg-query --snapshot graph.json overview --limit 50
//! ```
//!
//! Search around matching proteins, as JSON:
//! ```bash
//! kg-query --snapshot graph.json --format json search insulin --types protein --max-distance 1
//! ```
//!
//! Shortest path:
//! ```bash
//! kg-query --snapshot graph.json path e12 e40 --max-hops 4
//! ```
//!
//! Interactive mode:
//! ```bash
//! kg-query --snapshot graph.json --interactive
//! ```

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use paper_knowledge_graph::{
    graph::PathOutcome,
    models::{EntityId, EntityType},
    query::{
        format::{format_path, PathElement, PathView, ViewGraph},
        parse_entity_types, EntityListQuery, EntityPage, GraphQueries, GraphSearchQuery,
        KnowledgeGraphEngine, PathQuery, QueryLimits, SearchOutcome,
    },
    server::{FindPathResponse, SearchGraphResponse, NO_ENTITIES_MESSAGE, NO_PATH_MESSAGE},
    snapshot::{json::JsonSnapshotProvider, load_store},
};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Output format for query results
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-friendly tables
    Table,
    /// Machine-readable JSON
    Json,
}

/// Query a paper knowledge graph snapshot
#[derive(Parser, Debug)]
#[command(
    name = "kg-query",
    version,
    about = "Explore a paper knowledge graph: overviews, neighborhood search and shortest paths",
    long_about = "Load a knowledge-graph snapshot (JSON) and query it. Run one subcommand, \
                  or start an interactive session with --interactive.

EXAMPLES:
  Overview of the 50 best-connected entities:
    kg-query --snapshot graph.json overview --limit 50

  Search, one hop around matching proteins:
    kg-query --snapshot graph.json search insulin --types protein --max-distance 1

  Shortest path between two entities:
    kg-query --snapshot graph.json path e12 e40 --max-hops 4

  Interactive mode:
    kg-query --snapshot graph.json -i"
)]
struct Args {
    /// Snapshot file (JSON)
    #[arg(long, value_name = "PATH")]
    snapshot: PathBuf,

    #[command(subcommand)]
    command: Option<Command>,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    format: OutputFormat,

    /// Enable interactive REPL mode
    #[arg(long, short = 'i')]
    interactive: bool,

    /// Maximum entities one traversal may visit
    #[arg(long, value_name = "N")]
    max_visited: Option<usize>,

    /// Time budget per query; slower traversals return truncated results
    #[arg(long, value_name = "SECS")]
    timeout_secs: Option<u64>,

    /// Logging verbosity level
    #[arg(long, default_value = "warn", value_name = "LEVEL")]
    log_level: String,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Best-connected entities and the relationships among them
    Overview {
        /// Number of entities
        #[arg(long, value_name = "N", allow_negative_numbers = true)]
        limit: Option<i64>,
    },

    /// Entities matching TEXT plus their neighborhood
    Search {
        /// Text matched against names and aliases
        text: String,

        /// Restrict matches to these entity types (comma-separated)
        #[arg(long, value_delimiter = ',', value_name = "TYPES")]
        types: Vec<String>,

        /// Hops to expand around the matches
        #[arg(long, value_name = "N", allow_negative_numbers = true)]
        max_distance: Option<i64>,
    },

    /// Shortest path between two entity ids
    Path {
        from: String,
        to: String,

        /// Longest path to consider
        #[arg(long, value_name = "N", allow_negative_numbers = true)]
        max_hops: Option<i64>,
    },

    /// Page through entities, best-connected first
    Entities {
        /// Only entities of this type
        #[arg(long = "type", value_name = "TYPE")]
        entity_type: Option<String>,

        /// Substring of name or alias
        #[arg(long, value_name = "TEXT")]
        search: Option<String>,

        #[arg(long, value_name = "N", allow_negative_numbers = true)]
        page: Option<i64>,

        #[arg(long, value_name = "N", allow_negative_numbers = true)]
        limit: Option<i64>,
    },
}

/// Result of one query, ready to print.
enum Outcome {
    Graph(ViewGraph),
    Search(SearchOutcome),
    Path(PathOutcome),
    Entities(EntityPage),
}

/// Setup logging with the specified level
fn setup_logging(log_level: &str) {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)))
        .init();
}

/// Run one command against the engine
async fn execute<Q: GraphQueries>(
    engine: &Q,
    command: &Command,
    timeout: Option<Duration>,
) -> Result<Outcome> {
    debug!(?command, "executing command");
    let deadline = timeout.and_then(|t| Instant::now().checked_add(t));

    let outcome = match command {
        Command::Overview { limit } => Outcome::Graph(
            engine
                .get_graph(*limit)
                .await
                .context("Failed to load graph overview")?,
        ),
        Command::Search {
            text,
            types,
            max_distance,
        } => {
            let query = GraphSearchQuery {
                query: text.clone(),
                entity_types: parse_entity_types(types)?,
                max_distance: *max_distance,
                deadline,
            };
            Outcome::Search(
                engine
                    .search_graph(&query)
                    .await
                    .with_context(|| format!("Search failed for query: '{}'", text))?,
            )
        }
        Command::Path { from, to, max_hops } => {
            let query = PathQuery {
                from: EntityId::new(from.as_str()),
                to: EntityId::new(to.as_str()),
                max_hops: *max_hops,
                deadline,
            };
            Outcome::Path(
                engine
                    .find_shortest_path(&query)
                    .await
                    .with_context(|| format!("Path search failed: {} -> {}", from, to))?,
            )
        }
        Command::Entities {
            entity_type,
            search,
            page,
            limit,
        } => {
            let entity_type = entity_type
                .as_deref()
                .map(str::parse::<EntityType>)
                .transpose()?;
            let query = EntityListQuery {
                entity_type,
                search: search.clone(),
                page: *page,
                limit: *limit,
            };
            Outcome::Entities(
                engine
                    .list_entities(&query)
                    .await
                    .context("Failed to list entities")?,
            )
        }
    };
    Ok(outcome)
}

fn header(names: &[&str]) -> Vec<Cell> {
    names
        .iter()
        .map(|n| Cell::new(n).add_attribute(Attribute::Bold))
        .collect()
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Color-code a confidence score
fn confidence_cell(confidence: f64) -> Cell {
    let color = if confidence >= 0.8 {
        Color::Green
    } else if confidence >= 0.5 {
        Color::Yellow
    } else {
        Color::White
    };
    Cell::new(format!("{:.2}", confidence)).fg(color)
}

/// Format a graph as node and link tables
fn format_graph_table(view: &ViewGraph) -> String {
    if view.nodes.is_empty() {
        return "Graph is empty.".to_string();
    }

    let mut nodes = new_table();
    nodes.set_header(header(&["Id", "Name", "Type", "Papers", "Confidence"]));
    for node in &view.nodes {
        nodes.add_row(vec![
            Cell::new(&node.id),
            Cell::new(&node.name),
            Cell::new(node.entity_type),
            Cell::new(node.size),
            confidence_cell(node.confidence),
        ]);
    }

    let mut links = new_table();
    links.set_header(header(&["Source", "Predicate", "Target", "Confidence", "Strength"]));
    for link in &view.links {
        links.add_row(vec![
            Cell::new(&link.source),
            Cell::new(link.predicate),
            Cell::new(&link.target),
            confidence_cell(link.confidence),
            Cell::new(format!("{:.2}", link.strength)),
        ]);
    }

    let mut out = format!("{nodes}\n{links}");
    if let Some(stats) = &view.stats {
        out.push_str(&format!(
            "\nStore totals: {} entities, {} relationships, {} papers",
            stats.total_entities, stats.total_relationships, stats.total_papers
        ));
    }
    if view.truncated {
        out.push_str("\n(result truncated by traversal limits)");
    }
    out
}

/// Format a path as one row per hop
fn format_path_table(view: &PathView) -> String {
    let mut table = new_table();
    table.set_header(header(&["Step", "From", "Relationship", "To", "Confidence"]));

    let mut names = view.elements.iter().filter_map(|e| match e {
        PathElement::Entity(node) => Some(format!("{} ({})", node.name, node.id)),
        PathElement::Relationship(_) => None,
    });
    let mut current = names.next().unwrap_or_default();
    let links = view.elements.iter().filter_map(|e| match e {
        PathElement::Relationship(link) => Some(link),
        PathElement::Entity(_) => None,
    });
    for (step, link) in links.enumerate() {
        let next = names.next().unwrap_or_default();
        let arrow = if link.reversed {
            format!("<- {} -", link.predicate)
        } else {
            format!("- {} ->", link.predicate)
        };
        table.add_row(vec![
            Cell::new(step + 1),
            Cell::new(&current),
            Cell::new(arrow),
            Cell::new(&next),
            confidence_cell(link.confidence),
        ]);
        current = next;
    }

    if view.hops == 0 {
        return format!("Start and end are the same entity: {current}");
    }
    format!(
        "{table}\n{} hop(s), path strength {:.4}",
        view.hops, view.strength
    )
}

/// Format an entity page
fn format_entities_table(page: &EntityPage) -> String {
    if page.entities.is_empty() {
        return "No entities found.".to_string();
    }

    let mut table = new_table();
    table.set_header(header(&["Id", "Name", "Type", "Papers", "Aliases"]));
    for entity in &page.entities {
        let aliases = entity.aliases.iter().cloned().collect::<Vec<_>>().join(", ");
        table.add_row(vec![
            Cell::new(&entity.id),
            Cell::new(&entity.name),
            Cell::new(entity.entity_type),
            Cell::new(entity.paper_count()),
            Cell::new(aliases),
        ]);
    }
    format!(
        "{table}\nPage {} of {} ({} entities)",
        page.pagination.current, page.pagination.pages, page.pagination.total
    )
}

/// Render an outcome in the requested format
fn render(outcome: &Outcome, format: OutputFormat) -> Result<String> {
    let rendered = match format {
        OutputFormat::Table => match outcome {
            Outcome::Graph(view) => format_graph_table(view),
            Outcome::Search(SearchOutcome::Graph(view)) => format_graph_table(view),
            Outcome::Search(SearchOutcome::NoMatches) => NO_ENTITIES_MESSAGE.to_string(),
            Outcome::Path(PathOutcome::Found(path)) => format_path_table(&format_path(path)),
            Outcome::Path(PathOutcome::NoPath { truncated }) => {
                if *truncated {
                    format!("{NO_PATH_MESSAGE} (search stopped early by traversal limits)")
                } else {
                    NO_PATH_MESSAGE.to_string()
                }
            }
            Outcome::Entities(page) => format_entities_table(page),
        },
        OutputFormat::Json => {
            let value = match outcome {
                Outcome::Graph(view) => serde_json::to_value(view),
                Outcome::Search(search) => {
                    serde_json::to_value(SearchGraphResponse::from(search.clone()))
                }
                Outcome::Path(path) => serde_json::to_value(FindPathResponse::from(path.clone())),
                Outcome::Entities(page) => serde_json::to_value(page),
            }
            .context("Failed to serialize result to JSON")?;
            serde_json::to_string_pretty(&value).context("Failed to serialize result to JSON")?
        }
    };
    Ok(rendered)
}

fn print_help() {
    println!("Commands:");
    println!("  <text>                 - Search entities and their neighborhood");
    println!("  /overview [N]          - Show the N best-connected entities");
    println!("  /path FROM TO [HOPS]   - Shortest path between two entity ids");
    println!("  /entities [TYPE] [PAGE] - List entities, optionally of one type");
    println!("  /distance N            - Set search expansion distance");
    println!("  /types T1,T2 | clear   - Restrict search to entity types");
    println!("  /format table|json     - Set output format");
    println!("  /help                  - Show this help");
    println!("  Ctrl+D or Ctrl+C       - Exit");
}

/// Run interactive REPL mode
async fn run_interactive<Q: GraphQueries>(
    engine: Q,
    mut format: OutputFormat,
    timeout: Option<Duration>,
) -> Result<()> {
    println!("Interactive Knowledge Graph Query");
    print_help();
    println!();

    let mut rl = DefaultEditor::new().context("Failed to create readline editor")?;
    let mut max_distance: Option<i64> = None;
    let mut types: Vec<String> = Vec::new();

    loop {
        let line = match rl.readline("Graph> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => {
                println!("Goodbye!");
                break;
            }
            Err(err) => {
                error!("Error reading input: {}", err);
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        rl.add_history_entry(line).ok();

        let parts: Vec<&str> = line.split_whitespace().collect();
        let command = match parts[0] {
            "/help" => {
                print_help();
                continue;
            }
            "/format" => {
                match parts.get(1).copied() {
                    Some("table") => format = OutputFormat::Table,
                    Some("json") => format = OutputFormat::Json,
                    _ => eprintln!("Usage: /format [table|json]"),
                }
                continue;
            }
            "/distance" => {
                match parts.get(1).map(|v| v.parse::<i64>()) {
                    Some(Ok(n)) if n >= 0 => {
                        max_distance = Some(n);
                        println!("Set expansion distance to {}", n);
                    }
                    _ => eprintln!("Usage: /distance N (N >= 0)"),
                }
                continue;
            }
            "/types" => {
                match parts.get(1).copied() {
                    Some("clear") => {
                        types.clear();
                        println!("Cleared type filter");
                    }
                    Some(list) => match parse_entity_types(&list.split(',').collect::<Vec<_>>()) {
                        Ok(parsed) => {
                            types = parsed.iter().map(|t| t.to_string()).collect();
                            println!("Restricting search to: {}", types.join(", "));
                        }
                        Err(e) => eprintln!("{}", e),
                    },
                    None => eprintln!("Usage: /types T1,T2  or  /types clear"),
                }
                continue;
            }
            "/overview" => {
                let limit = match parts.get(1).map(|v| v.parse::<i64>()) {
                    None => None,
                    Some(Ok(n)) => Some(n),
                    Some(Err(_)) => {
                        eprintln!("Usage: /overview [N]");
                        continue;
                    }
                };
                Command::Overview { limit }
            }
            "/path" => {
                if parts.len() < 3 || parts.len() > 4 {
                    eprintln!("Usage: /path FROM TO [HOPS]");
                    continue;
                }
                let max_hops = match parts.get(3).map(|v| v.parse::<i64>()) {
                    None => None,
                    Some(Ok(n)) => Some(n),
                    Some(Err(_)) => {
                        eprintln!("Invalid hop count: must be an integer");
                        continue;
                    }
                };
                Command::Path {
                    from: parts[1].to_string(),
                    to: parts[2].to_string(),
                    max_hops,
                }
            }
            "/entities" => {
                let (entity_type, page) = match (parts.get(1), parts.get(2)) {
                    (Some(first), None) if first.parse::<i64>().is_ok() => {
                        (None, first.parse::<i64>().ok())
                    }
                    (first, second) => (
                        first.map(|t| t.to_string()),
                        second.and_then(|p| p.parse::<i64>().ok()),
                    ),
                };
                Command::Entities {
                    entity_type,
                    search: None,
                    page,
                    limit: None,
                }
            }
            other if other.starts_with('/') => {
                eprintln!("Unknown command: {}. Type /help for available commands.", other);
                continue;
            }
            _ => Command::Search {
                text: line.to_string(),
                types: types.clone(),
                max_distance,
            },
        };

        let start = Instant::now();
        match execute(&engine, &command, timeout).await {
            Ok(outcome) => match render(&outcome, format) {
                Ok(text) => {
                    println!("{}", text);
                    if matches!(format, OutputFormat::Table) {
                        println!("\nDone in {:.2}s", start.elapsed().as_secs_f64());
                    }
                }
                Err(e) => eprintln!("Error formatting output: {}", e),
            },
            Err(e) => eprintln!("Query failed: {:#}", e),
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logging
    setup_logging(&args.log_level);

    if !args.interactive && args.command.is_none() {
        anyhow::bail!(
            "Either a subcommand or --interactive must be specified.\n\
             Use --help for usage information."
        );
    }
    if args.interactive && args.command.is_some() {
        anyhow::bail!("--interactive cannot be combined with a subcommand");
    }

    if !args.snapshot.exists() {
        anyhow::bail!("Snapshot file not found: {}", args.snapshot.display());
    }

    info!("Loading snapshot from: {}", args.snapshot.display());
    let provider = JsonSnapshotProvider::from_file(&args.snapshot);
    let (store, stats) = load_store(&provider)
        .await
        .with_context(|| format!("Failed to load snapshot {}", args.snapshot.display()))?;
    if stats.duplicates_skipped + stats.failed > 0 {
        info!(
            "Skipped {} duplicate and {} invalid records",
            stats.duplicates_skipped, stats.failed
        );
    }

    let mut limits = QueryLimits::default();
    if let Some(max_visited) = args.max_visited {
        limits.max_visited = max_visited.max(1);
    }
    let engine = KnowledgeGraphEngine::with_limits(store.clone(), store.clone(), store, limits);
    let timeout = args.timeout_secs.map(Duration::from_secs);

    match args.command {
        Some(command) => {
            let outcome = execute(&engine, &command, timeout).await?;
            println!("{}", render(&outcome, args.format)?);
        }
        None => run_interactive(engine, args.format, timeout).await?,
    }

    Ok(())
}
