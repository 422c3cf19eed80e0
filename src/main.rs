//! # Knowledge Unify CLI (`kunify`)
//!
//! The `kunify` binary is the primary interface for the unification
//! pipeline. It provides commands for database initialization, record
//! loading, running the deduplication job, inspecting clusters, and
//! starting the HTTP trigger server.
//!
//! ## Usage
//!
//! ```bash
//! kunify --config ./config/kunify.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kunify init` | Create the SQLite database and run schema migrations |
//! | `kunify load <file>` | Load knowledge records from a JSONL export |
//! | `kunify unify` | Run normalization and both clustering stages |
//! | `kunify stats` | Print aggregate counts and per-source breakdown |
//! | `kunify cluster <id>` | Print one cluster with its members |
//! | `kunify serve http` | Start the HTTP trigger server |
//!
//! ## Examples
//!
//! ```bash
//! # Initialize the database
//! kunify init --config ./config/kunify.toml
//!
//! # Load an export of practical-work records
//! kunify load records.jsonl --config ./config/kunify.toml
//!
//! # Full pipeline run
//! kunify unify --config ./config/kunify.toml
//!
//! # Re-run only the clustering stages
//! kunify unify --skip-normalization --config ./config/kunify.toml
//!
//! # Start the trigger server for an external scheduler
//! kunify serve http --config ./config/kunify.toml
//! ```

mod cluster_exact;
mod cluster_semantic;
mod config;
mod db;
mod get;
mod load;
mod migrate;
#[allow(dead_code)]
mod models;
mod normalize;
mod pipeline;
mod server;
mod similarity;
mod stats;
#[allow(dead_code)]
mod store;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::pipeline::UnifyRequest;

/// Knowledge Unify CLI — batch deduplication and clustering for
/// practical-work knowledge records.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/kunify.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "kunify",
    about = "Knowledge Unify — batch deduplication and clustering for practical-work knowledge records",
    version,
    long_about = "Knowledge Unify merges textual knowledge records from the installation, \
    maintenance, and inspection collections into canonical clusters: exact duplicates by \
    content fingerprint, near duplicates by a combined cosine/Jaccard similarity test over \
    pre-computed embeddings."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/kunify.toml`. All database, pipeline, and
    /// server settings are read from this file.
    #[arg(long, global = true, default_value = "./config/kunify.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and all required tables
    /// (knowledge_records, knowledge_clusters, cluster_memberships).
    /// This command is idempotent — running it multiple times is safe.
    Init,

    /// Load knowledge records from a JSONL export.
    ///
    /// Each line is one record: `{"id", "source", "content", "created_at",
    /// "embedding"}`. `source` must be installation, maintenance, or
    /// inspection; `embedding` is an optional pre-computed float vector.
    /// Records are upserted by id; malformed lines are skipped with a
    /// warning.
    Load {
        /// Path to the JSONL file.
        file: PathBuf,
    },

    /// Run the unification pipeline.
    ///
    /// Normalizes and fingerprints pending records, clusters exact
    /// duplicates, attaches semantic near-duplicates to existing clusters,
    /// and prints the resulting stats. Every stage is idempotent, so
    /// partial or repeated invocations converge without redoing completed
    /// work.
    Unify {
        /// Free-form label for this invocation (e.g. `manual`,
        /// `scheduled`). Recorded in output only.
        #[arg(long, default_value = "manual")]
        mode: String,

        /// Skip the normalization stage.
        #[arg(long)]
        skip_normalization: bool,

        /// Skip both clustering stages.
        #[arg(long)]
        skip_clustering: bool,
    },

    /// Print aggregate counts and a per-source breakdown.
    Stats,

    /// Print one cluster with its canonical record and members.
    Cluster {
        /// Cluster UUID.
        id: String,
    },

    /// Start the HTTP trigger server.
    ///
    /// Exposes `POST /unify`, `GET /stats`, and `GET /health` for
    /// integration with an external scheduler or backend.
    Serve {
        #[command(subcommand)]
        service: ServeService,
    },
}

/// Server subcommands.
#[derive(Subcommand)]
enum ServeService {
    /// Start the HTTP trigger server.
    ///
    /// Binds to the address configured in `[server].bind`.
    Http,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Load { file } => {
            load::run_load(&cfg, &file).await?;
        }
        Commands::Unify {
            mode,
            skip_normalization,
            skip_clustering,
        } => {
            let request = UnifyRequest {
                mode,
                skip_normalization,
                skip_clustering,
            };
            run_unify_command(&cfg, &request).await?;
        }
        Commands::Stats => {
            stats::run_stats(&cfg).await?;
        }
        Commands::Cluster { id } => {
            get::run_get(&cfg, &id).await?;
        }
        Commands::Serve { service } => match service {
            ServeService::Http => {
                server::run_server(&cfg).await?;
            }
        },
    }

    Ok(())
}

/// Run the pipeline against the configured database and print the stats
/// payload.
async fn run_unify_command(cfg: &config::Config, request: &UnifyRequest) -> anyhow::Result<()> {
    let pool = db::connect(cfg).await?;
    let sqlite_store = store::sqlite::SqliteStore::new(pool.clone());

    let outcome = pipeline::run_unify(&sqlite_store, &cfg.unify, request).await;
    pool.close().await;
    let outcome = outcome?;

    println!("unify run (mode: {})", request.mode);
    println!("  normalized: {}", outcome.normalized);
    println!("  exact clusters created: {}", outcome.exact_clusters);
    println!("  semantic clusters expanded: {}", outcome.semantic_clusters);
    println!("  total records: {}", outcome.total_records);
    println!("  canonical records: {}", outcome.canonical_records);
    println!("  clustered records: {}", outcome.clustered_records);
    println!("  total clusters: {}", outcome.total_clusters);
    println!("  dedup rate: {:.1}%", outcome.dedup_rate * 100.0);
    println!("ok");

    Ok(())
}
