//! # ragserve CLI
//!
//! The `ragserve` binary is the primary interface to the pipeline. It
//! provides commands for document ingestion, one-off queries, and starting
//! the HTTP server.
//!
//! ## Usage
//!
//! ```bash
//! ragserve --config ./config/ragserve.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragserve ingest` | Ingest new PDFs from the data directory |
//! | `ragserve query "<question>"` | Answer a question against the index |
//! | `ragserve serve` | Start the HTTP server |

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use ragserve::config;
use ragserve::pipeline::Pipeline;
use ragserve::server;

/// ragserve — a guardrailed retrieval-augmented document Q&A service.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/ragserve.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "ragserve",
    about = "ragserve — a guardrailed retrieval-augmented document Q&A service",
    version,
    long_about = "ragserve ingests PDF documents into a persistent vector index and answers \
    questions against them with a multimodal language model, with input and output guardrail \
    scanning, confidence scoring, and response caching."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragserve.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest new PDFs from the configured data directory.
    ///
    /// Files already recorded in the ingestion registry are skipped, so
    /// running this repeatedly is safe.
    Ingest,

    /// Answer a single question against the index.
    Query {
        /// The question to answer.
        question: String,
    },

    /// Start the HTTP server.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Ingest => {
            let pipeline = Pipeline::new(&cfg)?;
            let summary = pipeline.ingest().await?;
            println!(
                "Ingestion complete: {} ingested, {} skipped, {} failed, {} nodes added.",
                summary.files_ingested,
                summary.files_skipped,
                summary.files_failed,
                summary.nodes_added
            );
        }
        Commands::Query { question } => {
            let pipeline = Pipeline::new(&cfg)?;
            let answer = pipeline.query(&question).await;
            println!("{}", answer.response);
            println!();
            println!("Confidence: {:.3}", answer.confidence);
            for source in &answer.source_files {
                println!("Source: {}", source);
            }
        }
        Commands::Serve => {
            let pipeline = Arc::new(Pipeline::new(&cfg)?);
            server::run_server(&cfg, pipeline).await?;
        }
    }

    Ok(())
}
