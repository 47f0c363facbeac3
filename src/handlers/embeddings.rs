//! `generate-embeddings`: text partitions → vectors.
//!
//! Partitions without an `Embedding` child are embedded in batches of
//! `batch_size`. Each vector becomes an `Embedding` artifact whose parent
//! is the partition, with the vector stored under
//! `embedding_{artifactId}`. Cancellation is checked between batches.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use memflow_core::embedding::EmbeddingGenerator;
use memflow_core::models::{ArtifactType, FileDetails, MIME_OCTET_STREAM};
use memflow_core::state::{keys, DataPipelineResult};

use super::{ensure_not_cancelled, steps, StepHandler, StepOutcome, StepResult};

pub struct GenerateEmbeddingsHandler {
    embedder: Arc<dyn EmbeddingGenerator>,
    batch_size: usize,
}

impl GenerateEmbeddingsHandler {
    pub fn new(embedder: Arc<dyn EmbeddingGenerator>, batch_size: usize) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
        }
    }
}

struct Pending {
    partition: FileDetails,
    text: String,
}

#[async_trait]
impl StepHandler for GenerateEmbeddingsHandler {
    fn step_name(&self) -> &str {
        steps::GENERATE_EMBEDDINGS
    }

    async fn invoke(&self, state: &mut DataPipelineResult, cancel: &CancellationToken) -> StepResult {
        let pending: Vec<Pending> = state
            .files_of_type(ArtifactType::TextPartition)
            .filter(|f| !state.has_children(&f.id, ArtifactType::Embedding))
            .map(|f| Pending {
                partition: f.clone(),
                text: state
                    .context_text(&keys::chunk_text(&f.id))
                    .unwrap_or_default()
                    .to_string(),
            })
            .collect();

        if pending.is_empty() {
            debug!("no partitions waiting for embeddings");
            return Ok(StepOutcome::TemporarySkip);
        }

        let model = self.embedder.model_name().to_string();
        for batch in pending.chunks(self.batch_size) {
            ensure_not_cancelled(cancel)?;

            let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
            let vectors = match self.embedder.embed_batch(&texts).await {
                Ok(v) => v,
                Err(e) => {
                    warn!(model = %model, error = %e, "embedding batch failed");
                    return Ok(StepOutcome::Failed(format!("embedding failed: {:#}", e)));
                }
            };
            if vectors.len() != batch.len() {
                return Ok(StepOutcome::Failed(format!(
                    "embedding generator returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }

            for (item, vector) in batch.iter().zip(vectors) {
                let partition = &item.partition;
                let mut artifact = FileDetails::new(
                    format!("{}.{}.embedding", partition.name, model),
                    ArtifactType::Embedding,
                    (vector.len() * std::mem::size_of::<f32>()) as u64,
                    MIME_OCTET_STREAM,
                )
                .with_parent(partition.id.clone());
                artifact.partition_number = partition.partition_number;
                artifact.section_number = partition.section_number;

                let key = keys::embedding(&artifact.id);
                state.add_file(artifact);
                state.set_context(key, vector);
            }
            debug!(batch = batch.len(), "embedded batch");
        }

        info!(model = %model, embeddings = pending.len(), "generated embeddings");
        Ok(StepOutcome::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use memflow_core::embedding::HashEmbedder;
    use memflow_core::models::MIME_PLAIN_TEXT;

    fn partitioned_state(texts: &[&str]) -> DataPipelineResult {
        let mut state = DataPipelineResult::new("d", "e", "i", vec![]);
        for (i, text) in texts.iter().enumerate() {
            let p = FileDetails::new(
                format!("a.txt.partition.{}.txt", i),
                ArtifactType::TextPartition,
                text.len() as u64,
                MIME_PLAIN_TEXT,
            )
            .with_partition(i, 0);
            let key = keys::chunk_text(&p.id);
            state.add_file(p);
            state.set_context(key, *text);
        }
        state
    }

    struct Broken;

    #[async_trait]
    impl EmbeddingGenerator for Broken {
        fn model_name(&self) -> &str {
            "broken"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            bail!("provider down")
        }
    }

    #[tokio::test]
    async fn test_embeds_every_partition() {
        let mut state = partitioned_state(&["alpha", "beta", "gamma"]);
        let handler = GenerateEmbeddingsHandler::new(Arc::new(HashEmbedder::new(8)), 2);

        let outcome = handler
            .invoke(&mut state, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome, StepOutcome::Success);

        let partitions: Vec<FileDetails> =
            state.files_of_type(ArtifactType::TextPartition).cloned().collect();
        for p in &partitions {
            let embedding: Vec<_> = state.children_of(&p.id, ArtifactType::Embedding).collect();
            assert_eq!(embedding.len(), 1);
            assert_eq!(embedding[0].partition_number, p.partition_number);
            let vector = state.context_vector(&keys::embedding(&embedding[0].id)).unwrap();
            assert_eq!(vector.len(), 8);
        }
        assert!(state.dangling_context_keys().is_empty());
    }

    #[tokio::test]
    async fn test_reinvocation_skips() {
        let mut state = partitioned_state(&["alpha"]);
        let handler = GenerateEmbeddingsHandler::new(Arc::new(HashEmbedder::new(8)), 4);
        let cancel = CancellationToken::new();
        handler.invoke(&mut state, &cancel).await.unwrap();
        let outcome = handler.invoke(&mut state, &cancel).await.unwrap();
        assert_eq!(outcome, StepOutcome::TemporarySkip);
        assert_eq!(state.files_of_type(ArtifactType::Embedding).count(), 1);
    }

    #[tokio::test]
    async fn test_provider_error_fails_step() {
        let mut state = partitioned_state(&["alpha"]);
        let handler = GenerateEmbeddingsHandler::new(Arc::new(Broken), 4);
        let outcome = handler
            .invoke(&mut state, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(outcome, StepOutcome::Failed(ref r) if r.contains("provider down")));
        assert_eq!(state.files_of_type(ArtifactType::Embedding).count(), 0);
    }
}
