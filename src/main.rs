//! # ragsync CLI
//!
//! Commands:
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragsync init` | Create the collection and hash index in the store |
//! | `ragsync index <dir>` | Run the ingestion pipeline over a directory |
//! | `ragsync check` | Verify embedding provider and store connectivity |
//!
//! All commands accept `--config` pointing to a TOML file; missing files
//! fall back to defaults plus environment overrides. Progress goes to
//! stderr, the summary to stdout, and the exit code is non-zero when any
//! file failed.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ragsync::config::{load_config, Config};
use ragsync::embedding::create_client;
use ragsync::pipeline::{CancelFlag, Pipeline};
use ragsync::progress::ProgressMode;
use ragsync::report::{format_bytes, print_summary, write_report};
use ragsync::scan::scan_directory;
use ragsync::store::{QdrantStore, HASH_FIELD};

/// ragsync — ingest local documents into a vector store.
#[derive(Parser)]
#[command(
    name = "ragsync",
    about = "Ingest local documents into a vector store for semantic search",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Defaults are used if missing.
    #[arg(long, global = true, default_value = "./ragsync.toml")]
    config: PathBuf,

    /// Progress output: auto (TTY), human, json, or off.
    #[arg(long, global = true, default_value = "auto")]
    progress: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the destination collection and its hash index. Idempotent.
    Init,

    /// Index every supported file under a directory.
    Index {
        /// Directory to ingest.
        directory: PathBuf,

        /// Override the collection name (defaults to a name derived from
        /// the directory when the config keeps the stock value).
        #[arg(long)]
        collection: Option<String>,

        /// Override chunking.fine_tokens.
        #[arg(long)]
        chunk_size: Option<usize>,

        /// Override chunking.overlap_tokens.
        #[arg(long)]
        overlap: Option<usize>,

        /// Scan and report what would be ingested without embedding or
        /// uploading anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Verify that the embedding provider and the vector store respond.
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ragsync=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(failed) if failed => ExitCode::FAILURE,
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns whether any file failed (maps to the exit code).
async fn run(cli: Cli) -> Result<bool> {
    let mut config = load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let store = QdrantStore::new(&config.store)?;
            bootstrap(&config, &store).await?;
            println!("collection '{}' ready", config.store.collection);
            Ok(false)
        }

        Commands::Check => {
            let store = QdrantStore::new(&config.store)?;
            bootstrap(&config, &store).await?;
            let client = create_client(&config.embedding, config.store.vector_dim)?;
            let probe = vec!["connectivity check".to_string()];
            let vectors = client
                .embed(&probe)
                .await
                .context("embedding provider did not respond")?;
            println!(
                "ok — store '{}' reachable, provider '{}' returned {}-dim vectors",
                config.store.collection,
                client.model_name(),
                vectors.first().map(|v| v.len()).unwrap_or(0)
            );
            Ok(false)
        }

        Commands::Index {
            directory,
            collection,
            chunk_size,
            overlap,
            dry_run,
        } => {
            apply_overrides(&mut config, &directory, collection, chunk_size, overlap);

            if dry_run {
                let documents = scan_directory(&config.scan, &directory)?;
                let bytes: u64 = documents.iter().map(|d| d.size).sum();
                println!("index {} (dry-run)", directory.display());
                println!("  files found: {}", documents.len());
                println!("  data: {}", format_bytes(bytes));
                println!("  collection: {}", config.store.collection);
                return Ok(false);
            }

            let store = QdrantStore::new(&config.store)?;
            let client = create_client(&config.embedding, config.store.vector_dim)?;
            let progress = progress_mode(&cli.progress)?.reporter();

            let cancel = CancelFlag::new();
            let ctrlc_flag = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("interrupt received, finishing the file in flight");
                    ctrlc_flag.cancel();
                }
            });

            let mut pipeline =
                Pipeline::new(&config, &store, client.as_ref(), progress.as_ref(), cancel)?;
            let stats = pipeline.run(&directory).await?;

            print_summary(&stats);
            write_report(&stats, &config.output)?;

            Ok(stats.files_failed > 0)
        }
    }
}

async fn bootstrap(config: &Config, store: &QdrantStore) -> Result<()> {
    use ragsync::store::VectorStore;
    store
        .ensure_collection(
            &config.store.collection,
            config.store.vector_dim,
            &config.store.distance,
        )
        .await
        .context("store bootstrap failed")?;
    store
        .ensure_hash_index(&config.store.collection, HASH_FIELD)
        .await
        .context("hash index bootstrap failed")?;
    Ok(())
}

fn apply_overrides(
    config: &mut Config,
    directory: &std::path::Path,
    collection: Option<String>,
    chunk_size: Option<usize>,
    overlap: Option<usize>,
) {
    if let Some(collection) = collection {
        config.store.collection = collection;
    } else if config.store.collection == "documentation" {
        // Stock collection name: derive one from the directory, so two
        // indexed trees land in separate collections by default.
        if let Some(derived) = derive_collection_name(directory) {
            tracing::info!(collection = %derived, "collection derived from directory name");
            config.store.collection = derived;
        }
    }
    if let Some(chunk_size) = chunk_size {
        config.chunking.fine_tokens = chunk_size;
    }
    if let Some(overlap) = overlap {
        config.chunking.overlap_tokens = overlap;
    }
}

/// Sanitize a directory name into a collection name: lowercase
/// alphanumerics and underscores, runs collapsed.
fn derive_collection_name(directory: &std::path::Path) -> Option<String> {
    let name = directory
        .canonicalize()
        .ok()
        .and_then(|p| p.file_name().map(|f| f.to_string_lossy().into_owned()))
        .or_else(|| {
            directory
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
        })?;

    let mut out = String::with_capacity(name.len());
    let mut last_underscore = false;
    for c in name.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c);
            last_underscore = false;
        } else if !last_underscore {
            out.push('_');
            last_underscore = true;
        }
    }
    let trimmed = out.trim_matches('_').to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn progress_mode(raw: &str) -> Result<ProgressMode> {
    match raw {
        "auto" => Ok(ProgressMode::default_for_tty()),
        "human" => Ok(ProgressMode::Human),
        "json" => Ok(ProgressMode::Json),
        "off" => Ok(ProgressMode::Off),
        other => anyhow::bail!(
            "Unknown progress mode: '{}'. Must be auto, human, json, or off.",
            other
        ),
    }
}
