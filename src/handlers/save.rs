//! `save-records`: partitions + embeddings → storage.
//!
//! Builds one [`MemoryRecord`] per text partition and upserts them into
//! the run's index in a single call. The record id is the partition's
//! artifact id, so saving the same state twice replaces rather than
//! duplicates. Record tags merge the run's tags with the chunk's own tags.
//!
//! The orchestrator only accepts this step in final position and never
//! cancels it once started, so records never reach storage from a run
//! that does not complete.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use memflow_core::models::{ArtifactType, FileDetails, MemoryRecord};
use memflow_core::state::{keys, DataPipelineResult};
use memflow_core::store::MemoryStore;

use super::{ensure_not_cancelled, origin_of, steps, StepHandler, StepOutcome, StepResult};

pub struct SaveRecordsHandler {
    store: Arc<dyn MemoryStore>,
}

impl SaveRecordsHandler {
    pub fn new(store: Arc<dyn MemoryStore>) -> Self {
        Self { store }
    }
}

fn record_tags(state: &DataPipelineResult, partition: &FileDetails) -> BTreeMap<String, Vec<String>> {
    let mut tags: BTreeMap<String, Vec<String>> = state
        .tags
        .iter()
        .map(|(k, v)| (k.clone(), vec![v.clone()]))
        .collect();

    let chunk_tags = state
        .context(&keys::chunk_tags(&partition.id))
        .and_then(|v| v.as_json())
        .and_then(|v| v.as_object());
    if let Some(chunk_tags) = chunk_tags {
        for (key, value) in chunk_tags {
            let Some(s) = value.as_str() else {
                continue;
            };
            let values = tags.entry(key.clone()).or_default();
            if !values.iter().any(|v| v == s) {
                values.push(s.to_string());
            }
        }
    }
    tags
}

fn build_record(state: &DataPipelineResult, partition: &FileDetails) -> MemoryRecord {
    let embedding = state
        .children_of(&partition.id, ArtifactType::Embedding)
        .find_map(|e| state.context_vector(&keys::embedding(&e.id)))
        .map(<[f32]>::to_vec)
        .unwrap_or_default();

    MemoryRecord {
        id: partition.id.clone(),
        document_id: state.document_id.clone(),
        execution_id: state.execution_id.clone(),
        index: state.index.clone(),
        file_name: origin_of(state, partition).name.clone(),
        text: state
            .context_text(&keys::chunk_text(&partition.id))
            .unwrap_or_default()
            .to_string(),
        artifact_type: ArtifactType::TextPartition,
        partition_number: partition.partition_number.unwrap_or_default(),
        section_number: partition.section_number.unwrap_or_default(),
        tags: record_tags(state, partition),
        created_at: Utc::now(),
        embedding,
    }
}

#[async_trait]
impl StepHandler for SaveRecordsHandler {
    fn step_name(&self) -> &str {
        steps::SAVE_RECORDS
    }

    async fn invoke(&self, state: &mut DataPipelineResult, cancel: &CancellationToken) -> StepResult {
        ensure_not_cancelled(cancel)?;

        let records: Vec<MemoryRecord> = state
            .files_of_type(ArtifactType::TextPartition)
            .map(|p| build_record(state, p))
            .collect();

        if records.is_empty() {
            debug!("no partitions to save");
            return Ok(StepOutcome::TemporarySkip);
        }

        let without_vectors = records.iter().filter(|r| r.embedding.is_empty()).count();
        if without_vectors > 0 {
            warn!(count = without_vectors, "saving records without embeddings");
        }

        let count = records.len();
        if let Err(e) = self.store.upsert(&state.index, records).await {
            warn!(index = %state.index, error = %e, "storage upsert failed");
            return Ok(StepOutcome::Failed(format!("storage upsert failed: {:#}", e)));
        }

        info!(index = %state.index, records = count, "saved records");
        Ok(StepOutcome::Success)
    }
}
