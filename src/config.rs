//! TOML configuration.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all, via [`Config::default`]) yields the standard four-step pipeline
//! with the simple chunker, the hash embedder and the in-memory store.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

use memflow_core::chunk::{SemanticChunkerOptions, SimpleChunkerOptions};

use crate::handlers::steps;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub chunking: SimpleChunkerOptions,
    #[serde(default)]
    pub semantic_chunking: SemanticChunkerOptions,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_steps")]
    pub steps: Vec<String>,
    /// `"simple"` or `"semantic"`; selects the handler registered as
    /// `text-chunking`.
    #[serde(default = "default_chunker")]
    pub chunker: String,
    #[serde(default = "default_index")]
    pub default_index: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            chunker: default_chunker(),
            default_index: default_index(),
        }
    }
}

fn default_steps() -> Vec<String> {
    steps::DEFAULT_PIPELINE.iter().map(|s| s.to_string()).collect()
}
fn default_chunker() -> String {
    "simple".to_string()
}
fn default_index() -> String {
    "default".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    /// Base URL of the MarkItDown conversion service. When unset, only
    /// text formats can be extracted.
    #[serde(default)]
    pub service_url: Option<String>,
    #[serde(default = "default_extraction_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_extraction_max_retries")]
    pub max_retries: u32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            service_url: None,
            timeout_secs: default_extraction_timeout_secs(),
            max_retries: default_extraction_max_retries(),
        }
    }
}

fn default_extraction_timeout_secs() -> u64 {
    120
}
fn default_extraction_max_retries() -> u32 {
    3
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (Ollama host, OpenAI-compatible gateway).
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_storage_provider")]
    pub provider: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: default_storage_provider(),
        }
    }
}

fn default_storage_provider() -> String {
    "memory".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a TOML document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Validate pipeline
    if config.pipeline.steps.is_empty() {
        bail!("pipeline.steps must list at least one step");
    }
    if config.pipeline.default_index.trim().is_empty() {
        bail!("pipeline.default_index must not be empty");
    }
    match config.pipeline.chunker.as_str() {
        "simple" | "semantic" => {}
        other => bail!(
            "Unknown chunker: '{}'. Must be simple or semantic.",
            other
        ),
    }

    // Validate chunking
    let simple = &config.chunking;
    if simple.max_chunk_size == 0 {
        bail!("chunking.max_chunk_size must be > 0");
    }
    if simple.text_overlap >= simple.max_chunk_size {
        bail!("chunking.text_overlap must be < chunking.max_chunk_size");
    }

    let semantic = &config.semantic_chunking;
    if semantic.max_chunk_size == 0 {
        bail!("semantic_chunking.max_chunk_size must be > 0");
    }
    if semantic.min_chunk_size > semantic.max_chunk_size {
        bail!("semantic_chunking.min_chunk_size must be <= semantic_chunking.max_chunk_size");
    }
    if semantic.text_overlap >= semantic.max_chunk_size {
        bail!("semantic_chunking.text_overlap must be < semantic_chunking.max_chunk_size");
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "hash" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => bail!(
            "Unknown embedding provider: '{}'. Must be hash, openai, or ollama.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    // Validate storage
    if config.storage.provider != "memory" {
        bail!(
            "Unknown storage provider: '{}'. Must be memory.",
            config.storage.provider
        );
    }

    Ok(())
}
