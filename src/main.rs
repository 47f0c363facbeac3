//! # memflow CLI
//!
//! ## Usage
//!
//! ```bash
//! memflow --config ./memflow.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `memflow upload <files>...` | Run the configured pipeline over the files as one document |
//! | `memflow chunk <file>` | Print the chunks a file's text would be split into |
//!
//! ## Examples
//!
//! ```bash
//! # Ingest two files into the "notes" index, tagged by team
//! memflow upload --index notes --tag team=docs guide.md faq.md
//!
//! # Preview structure-aware chunking
//! memflow chunk --semantic guide.md
//! ```
//!
//! Without `--config`, built-in defaults are used: plain-text extraction
//! only, the simple chunker, the hash embedder and the in-memory store.
//! When `extraction.service_url` is set, `upload` health-checks the
//! service before reading any file. Ctrl-C cancels a running upload.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use memflow::config::{self, Config};
use memflow::embedding::create_generator;
use memflow::extract::RoutingExtractor;
use memflow::handlers::HandlerRegistry;
use memflow::logging;
use memflow::{Orchestrator, UploadRequest};
use memflow_core::chunk::{semantic, simple};
use memflow_core::models::ArtifactType;
use memflow_core::store::memory::InMemoryStore;

/// memflow: ingest documents through extraction, chunking, embedding and
/// storage steps.
#[derive(Parser)]
#[command(name = "memflow", version, about)]
struct Cli {
    /// Path to configuration file (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline over one or more files.
    ///
    /// All files become part of a single document. Prints the document id,
    /// the steps that ran, artifact counts and the number of stored records.
    Upload {
        /// Target index (defaults to `pipeline.default_index`).
        #[arg(long)]
        index: Option<String>,

        /// Request tag as `key=value`; may be repeated.
        #[arg(long = "tag", value_parser = parse_tag)]
        tags: Vec<(String, String)>,

        /// Explicit document id instead of a generated one.
        #[arg(long)]
        document_id: Option<String>,

        /// Files to ingest.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Split a text file and print the chunks.
    Chunk {
        /// Use the structure-aware chunker instead of the simple one.
        #[arg(long)]
        semantic: bool,

        /// Text file to chunk.
        file: PathBuf,
    },
}

fn parse_tag(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

fn load(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None => Ok(Config::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing();
    let cli = Cli::parse();
    let cfg = load(cli.config.as_deref())?;

    match cli.command {
        Commands::Upload {
            index,
            tags,
            document_id,
            files,
        } => run_upload(&cfg, index, tags, document_id, &files).await?,
        Commands::Chunk { semantic, file } => run_chunk(&cfg, semantic, &file)?,
    }

    Ok(())
}

async fn run_upload(
    cfg: &Config,
    index: Option<String>,
    tags: Vec<(String, String)>,
    document_id: Option<String>,
    files: &[PathBuf],
) -> Result<()> {
    let extractor = RoutingExtractor::from_config(&cfg.extraction)?;
    extractor
        .check_service()
        .await
        .context("Extraction service health check failed")?;

    let store = Arc::new(InMemoryStore::new());
    let registry = HandlerRegistry::from_config(
        cfg,
        Arc::new(extractor),
        create_generator(&cfg.embedding)?,
        store.clone(),
    )?;
    let orchestrator = Orchestrator::new(Arc::new(registry), cfg.pipeline.steps.clone());

    let mut builder = UploadRequest::builder();
    for path in files {
        builder = builder
            .add_file_path_async(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
    }
    for (key, value) in tags {
        builder = builder.add_tag(key, value);
    }
    if let Some(id) = document_id {
        builder = builder.document_id(id);
    }
    let request = builder.build()?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let index = index.unwrap_or_else(|| cfg.pipeline.default_index.clone());
    let state = orchestrator.prepare_new_upload(&index, request)?;
    let state = match orchestrator.run_pipeline(state, &cancel).await {
        Ok(state) => state,
        Err(e) if e.is_cancelled() => bail!("upload cancelled"),
        Err(e) => {
            let (error, state) = e.into_parts();
            eprintln!(
                "Completed steps before failure: {}",
                state.completed_steps.join(", ")
            );
            return Err(error.into());
        }
    };

    println!("document {}", state.document_id);
    println!("  execution:   {}", state.execution_id);
    println!("  index:       {}", state.index);
    println!("  steps:       {}", state.completed_steps.join(" → "));
    for artifact_type in [
        ArtifactType::Undefined,
        ArtifactType::ExtractedText,
        ArtifactType::TextPartition,
        ArtifactType::Embedding,
    ] {
        println!(
            "  {:<15} {}",
            artifact_type.as_str(),
            state.files_of_type(artifact_type).count()
        );
    }
    println!("  records:     {}", store.count(&state.index));
    Ok(())
}

fn run_chunk(cfg: &Config, use_semantic: bool, file: &Path) -> Result<()> {
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let chunks = if use_semantic {
        semantic::chunk_text(&text, &cfg.semantic_chunking)
    } else {
        simple::chunk_text(&text, &cfg.chunking)
    };

    if chunks.is_empty() {
        println!("(no chunks: file has no text)");
    }
    for chunk in &chunks {
        println!(
            "--- chunk {} (section {}, {} chars) ---",
            chunk.chunk_number,
            chunk.section_number,
            chunk.char_len()
        );
        println!("{}", chunk.text);
    }
    Ok(())
}
