//! camille - CLI for the Camille code index
//!
//! # Usage
//!
//! ```bash
//! # Index a workspace (incremental against the manifest)
//! camille -w /path/to/repo index
//!
//! # Search for code
//! camille -w /path/to/repo search "parse configuration"
//!
//! # Who calls a function
//! camille -w /path/to/repo callers loadConfig
//!
//! # Keep the index current while files change
//! camille -w /path/to/repo watch
//! ```
//!
//! - `--json` outputs machine-readable JSON
//! - Errors go to stderr, results to stdout
//! - Exit codes: 0 = success, 1 = error

use anyhow::{Context, Result};
use camille_index::embedding::EmbeddingProvider;
use camille_index::watcher::start_watcher;
use camille_index::{
    HashingEmbedder, IncrementalIndexer, IndexConfig, IndexStatus, Node, NodeKind, ResolutionReport,
    SearchOptions, SearchResponse,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "camille")]
#[command(version)]
#[command(about = "Camille - incremental code index with graph and semantic search")]
#[command(long_about = r#"
camille keeps a searchable model of a codebase:

  - A graph of functions, classes, interfaces and modules
  - Calls, imports, extends and implements edges across files
  - Embeddings for semantic search

Designed for automation: use --json for machine-readable output.
"#)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory to index (repeatable); the first one holds the cache
    #[arg(short, long = "workspace", global = true)]
    workspaces: Vec<PathBuf>,

    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    /// Only log warnings
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Embedding provider
    #[arg(long, global = true, value_enum, default_value_t = EmbedderKind::Hashing)]
    embedder: EmbedderKind,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EmbedderKind {
    /// Deterministic feature hashing, no model download
    Hashing,
    /// all-MiniLM-L6-v2 via fastembed (requires the `fastembed` feature)
    Fastembed,
}

#[derive(Subcommand)]
enum Commands {
    /// Build or update the index
    Index {
        /// Ignore the manifest and embedding cache
        #[arg(long)]
        force: bool,
    },

    /// Search by name, path mention or meaning
    Search {
        /// Search query
        query: String,

        /// Maximum results to return
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Include one-hop relationships for each result
        #[arg(long)]
        relationships: bool,

        /// Only return nodes of this kind (repeatable)
        #[arg(long = "kind")]
        kinds: Vec<NodeKind>,
    },

    /// Show index status
    Status,

    /// Re-run edge resolution
    Resolve {
        /// Re-parse every indexed file first
        #[arg(long)]
        force_reparse: bool,
    },

    /// Functions and methods that call `name`
    Callers { name: String },

    /// Functions and methods called by `name`
    Callees { name: String },

    /// Index, then keep the index current until interrupted
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging goes to stderr to keep stdout clean
    let default_directive = if cli.quiet { "warn" } else { "camille_index=info" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive)),
        )
        .init();

    match run_command(&cli).await {
        Ok(output) => {
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&output)?);
            } else {
                print_human_readable(&output);
            }
            Ok(())
        }
        Err(e) => {
            if cli.json {
                let err = serde_json::json!({
                    "error": format!("{e:#}")
                });
                eprintln!("{}", serde_json::to_string_pretty(&err)?);
            } else {
                eprintln!("Error: {e:#}");
            }
            std::process::exit(1);
        }
    }
}

fn workspaces(cli: &Cli) -> Result<Vec<PathBuf>> {
    let raw = if cli.workspaces.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        cli.workspaces.clone()
    };
    raw.into_iter()
        .map(|w| {
            w.canonicalize()
                .with_context(|| format!("workspace {} not found", w.display()))
        })
        .collect()
}

fn embedder(kind: EmbedderKind) -> Result<Arc<dyn EmbeddingProvider>> {
    match kind {
        EmbedderKind::Hashing => Ok(Arc::new(HashingEmbedder::default())),
        #[cfg(feature = "fastembed")]
        EmbedderKind::Fastembed => Ok(Arc::new(camille_index::embedding::FastEmbedProvider::new()?)),
        #[cfg(not(feature = "fastembed"))]
        EmbedderKind::Fastembed => {
            anyhow::bail!("this build has no fastembed support; rebuild with --features fastembed")
        }
    }
}

/// Open the index over every workspace and bring it up to date.
async fn open_index(cli: &Cli, roots: &[PathBuf], fresh: bool) -> Result<IncrementalIndexer> {
    let home = roots.first().context("no workspace given")?;
    let config = IndexConfig::load(home).context("loading configuration")?;
    let indexer = IncrementalIndexer::builder(home)
        .config(config)
        .embedder(embedder(cli.embedder)?)
        .fresh(fresh)
        .build()
        .await
        .context("opening index")?;

    for root in roots {
        indexer
            .add_directory(root)
            .await
            .with_context(|| format!("indexing {}", root.display()))?;
    }
    indexer.wait_until_ready().await?;
    Ok(indexer)
}

async fn run_command(cli: &Cli) -> Result<Output> {
    let roots = workspaces(cli)?;
    let fresh = matches!(cli.command, Commands::Index { force: true });
    let indexer = open_index(cli, &roots, fresh).await?;

    let output = match &cli.command {
        Commands::Index { .. } | Commands::Status => Output::Status {
            status: indexer.status().await,
        },
        Commands::Search {
            query,
            limit,
            relationships,
            kinds,
        } => {
            let options = SearchOptions {
                limit: limit.unwrap_or(indexer.config().search.default_limit),
                include_relationships: *relationships,
                kinds: (!kinds.is_empty()).then(|| kinds.clone()),
                path_prefix: None,
            };
            Output::Search {
                response: indexer.search(query, &options).await,
            }
        }
        Commands::Resolve { force_reparse } => Output::Resolve {
            report: indexer.trigger_resolution(*force_reparse).await?,
        },
        Commands::Callers { name } => Output::Calls {
            symbol: name.clone(),
            direction: "callers",
            results: indexer.callers(name).await?.iter().map(NodeResult::from).collect(),
        },
        Commands::Callees { name } => Output::Calls {
            symbol: name.clone(),
            direction: "callees",
            results: indexer.callees(name).await?.iter().map(NodeResult::from).collect(),
        },
        Commands::Watch => {
            watch(&indexer).await?;
            Output::Status {
                status: indexer.status().await,
            }
        }
    };

    indexer.shutdown().await?;
    Ok(output)
}

async fn watch(indexer: &IncrementalIndexer) -> Result<()> {
    let roots = indexer.watched_roots();
    let debounce = Duration::from_millis(indexer.config().watch_debounce_ms);
    let (_handle, events) = start_watcher(&roots, debounce, indexer.path_filter())?;
    tracing::info!(roots = roots.len(), "watching for changes, Ctrl-C to stop");

    tokio::select! {
        _ = indexer.run_watch_loop(events) => {}
        result = tokio::signal::ctrl_c() => result.context("waiting for Ctrl-C")?,
    }
    Ok(())
}

#[derive(serde::Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Output {
    Status {
        status: IndexStatus,
    },
    Search {
        response: SearchResponse,
    },
    Resolve {
        report: ResolutionReport,
    },
    Calls {
        symbol: String,
        direction: &'static str,
        results: Vec<NodeResult>,
    },
}

#[derive(serde::Serialize)]
struct NodeResult {
    name: String,
    kind: NodeKind,
    file: String,
    line: u32,
}

impl From<&Node> for NodeResult {
    fn from(node: &Node) -> Self {
        Self {
            name: node.name.clone(),
            kind: node.kind,
            file: node.file.display().to_string(),
            line: node.line,
        }
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn print_human_readable(output: &Output) {
    match output {
        Output::Status { status } => {
            println!(
                "Indexed {} files: {} nodes, {} edges",
                status.files_indexed, status.node_count, status.edge_count
            );
            println!("Phase: {:?} (generation {})", status.phase, status.generation);
            if let Some(stats) = &status.last_resolution {
                println!(
                    "Last resolution: {} resolved, {} unresolved, {} ambiguous",
                    stats.resolved, stats.unresolved, stats.ambiguous
                );
            }
            if !status.capabilities.semantic {
                println!("Semantic search disabled");
            }
            if !status.capabilities.structural {
                println!("Structural features disabled");
            }
            for root in &status.watched_roots {
                println!("Workspace: {}", display(root));
            }
        }
        Output::Search { response } => {
            println!("Search: \"{}\"", response.query);
            println!("Found {} results:", response.results.len());
            for r in &response.results {
                println!(
                    "  {:.2} {:?} {} ({}) at {}:{}",
                    r.similarity,
                    r.tier,
                    r.node.name,
                    r.node.kind,
                    display(&r.node.file),
                    r.node.line
                );
                for rel in &r.relationships {
                    println!(
                        "      {} {:?} {} ({})",
                        rel.relationship, rel.direction, rel.node.name, display(&rel.node.file)
                    );
                }
            }
            if !response.readiness.is_ready() {
                println!("Index state: {:?}", response.readiness.state);
            }
            if !response.readiness.degraded.is_empty() {
                println!("Degraded signals: {:?}", response.readiness.degraded);
            }
        }
        Output::Resolve { report } => {
            println!(
                "Generation {}: {} resolved, {} unresolved, {} ambiguous in {} ms",
                report.generation,
                report.stats.resolved,
                report.stats.unresolved,
                report.stats.ambiguous,
                report.duration_ms
            );
            println!(
                "{} edges written, {} removed",
                report.edges_written, report.edges_removed
            );
            for (strategy, count) in &report.by_strategy {
                println!("  {}: {}", strategy.as_str(), count);
            }
        }
        Output::Calls {
            symbol,
            direction,
            results,
        } => {
            println!("{} of \"{}\":", direction, symbol);
            println!("Found {} results:", results.len());
            for c in results {
                println!("  {} ({}) at {}:{}", c.name, c.kind, c.file, c.line);
            }
        }
    }
}
