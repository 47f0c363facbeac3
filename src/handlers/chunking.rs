//! `text-chunking`: extracted text → text partitions.
//!
//! Two handlers share one driver and differ only in the engine they call:
//! [`SimpleChunkingHandler`] uses `memflow_core::chunk::simple`,
//! [`SemanticChunkingHandler`] uses `memflow_core::chunk::semantic`.
//!
//! # Algorithm
//!
//! 1. Select `ExtractedText` artifacts without `TextPartition` children.
//! 2. Chunk the text stored under `extracted_text_{id}`. Missing or empty
//!    text yields a single placeholder chunk tagged `fallback`.
//! 3. For each chunk append a `TextPartition` artifact named
//!    `{upload}.partition.{n}.txt` and store its text under
//!    `chunk_text_{partitionId}`. Chunk tags, when present, go under
//!    `chunk_tags_{partitionId}` as a JSON object.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use memflow_core::chunk::{self, semantic, simple, SemanticChunkerOptions, SimpleChunkerOptions};
use memflow_core::models::{ArtifactType, Chunk, FileDetails, MIME_PLAIN_TEXT};
use memflow_core::state::{keys, DataPipelineResult};

use super::{ensure_not_cancelled, origin_of, steps, StepHandler, StepOutcome, StepResult};

/// Chunk every unchunked extracted text in `state` with `chunker`.
fn chunk_sources<F>(
    state: &mut DataPipelineResult,
    cancel: &CancellationToken,
    chunker: F,
) -> StepResult
where
    F: Fn(&str) -> Vec<Chunk>,
{
    let sources: Vec<(String, String)> = state
        .files_of_type(ArtifactType::ExtractedText)
        .filter(|f| !state.has_children(&f.id, ArtifactType::TextPartition))
        .map(|f| (f.id.clone(), origin_of(state, f).name.clone()))
        .collect();

    if sources.is_empty() {
        debug!("no extracted text waiting for chunking");
        return Ok(StepOutcome::TemporarySkip);
    }

    for (source_id, upload_name) in sources {
        ensure_not_cancelled(cancel)?;

        let text = state
            .context_text(&keys::extracted_text(&source_id))
            .unwrap_or_default();
        let mut chunks = chunker(text);
        if chunks.is_empty() {
            warn!(file = %upload_name, "no text to chunk, emitting placeholder");
            chunks.push(chunk::placeholder_chunk(&upload_name));
        }

        info!(file = %upload_name, chunks = chunks.len(), "chunked text");
        for c in chunks {
            let partition = FileDetails::new(
                format!("{}.partition.{}.txt", upload_name, c.chunk_number),
                ArtifactType::TextPartition,
                c.text.len() as u64,
                MIME_PLAIN_TEXT,
            )
            .with_parent(source_id.clone())
            .with_partition(c.chunk_number, c.section_number);
            let partition_id = partition.id.clone();
            state.add_file(partition);

            if !c.tags.is_empty() {
                let tags: serde_json::Map<String, serde_json::Value> = c
                    .tags
                    .iter()
                    .map(|(k, v)| {
                        let value = v
                            .clone()
                            .map_or(serde_json::Value::Null, serde_json::Value::String);
                        (k.clone(), value)
                    })
                    .collect();
                state.set_context(
                    keys::chunk_tags(&partition_id),
                    serde_json::Value::Object(tags),
                );
            }
            state.set_context(keys::chunk_text(&partition_id), c.text);
        }
    }

    Ok(StepOutcome::Success)
}

/// Fixed-window chunking with separator preference and overlap.
pub struct SimpleChunkingHandler {
    step_name: String,
    options: SimpleChunkerOptions,
}

impl SimpleChunkingHandler {
    pub fn new(options: SimpleChunkerOptions) -> Self {
        Self {
            step_name: steps::TEXT_CHUNKING.to_string(),
            options,
        }
    }

    pub fn with_step_name(mut self, step_name: impl Into<String>) -> Self {
        self.step_name = step_name.into();
        self
    }
}

#[async_trait]
impl StepHandler for SimpleChunkingHandler {
    fn step_name(&self) -> &str {
        &self.step_name
    }

    async fn invoke(&self, state: &mut DataPipelineResult, cancel: &CancellationToken) -> StepResult {
        chunk_sources(state, cancel, |text| simple::chunk_text(text, &self.options))
    }
}

/// Heading-aware chunking.
pub struct SemanticChunkingHandler {
    step_name: String,
    options: SemanticChunkerOptions,
}

impl SemanticChunkingHandler {
    pub fn new(options: SemanticChunkerOptions) -> Self {
        Self {
            step_name: steps::TEXT_CHUNKING.to_string(),
            options,
        }
    }

    pub fn with_step_name(mut self, step_name: impl Into<String>) -> Self {
        self.step_name = step_name.into();
        self
    }
}

#[async_trait]
impl StepHandler for SemanticChunkingHandler {
    fn step_name(&self) -> &str {
        &self.step_name
    }

    async fn invoke(&self, state: &mut DataPipelineResult, cancel: &CancellationToken) -> StepResult {
        chunk_sources(state, cancel, |text| semantic::chunk_text(text, &self.options))
    }
}
