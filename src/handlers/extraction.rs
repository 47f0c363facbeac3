//! `text-extraction`: uploaded bytes → extracted text.
//!
//! # Algorithm
//!
//! 1. Select `Undefined` artifacts that have no `ExtractedText` child yet.
//! 2. For each, look up its pending upload bytes and call the
//!    [`TextExtractor`]. Transient failures are retried with exponential
//!    backoff; a permanent failure, or running out of retries, fails the
//!    step.
//! 3. Append an `ExtractedText` artifact named `{file}.extract.txt` whose
//!    parent is the upload, and store the text under
//!    `extracted_text_{artifactId}`.
//!
//! Empty extracted text is not an error here; the chunking step turns it
//! into a tagged placeholder chunk.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use memflow_core::models::{ArtifactType, FileDetails, UploadedFile, MIME_PLAIN_TEXT};
use memflow_core::state::{keys, DataPipelineResult};

use super::{ensure_not_cancelled, steps, StepCancelled, StepHandler, StepOutcome, StepResult};
use crate::extract::{ExtractionError, TextExtractor};

const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

pub struct TextExtractionHandler {
    extractor: Arc<dyn TextExtractor>,
    max_retries: u32,
    backoff: Duration,
}

impl TextExtractionHandler {
    pub fn new(extractor: Arc<dyn TextExtractor>, max_retries: u32) -> Self {
        Self {
            extractor,
            max_retries,
            backoff: DEFAULT_BACKOFF,
        }
    }

    /// Base delay before the first retry; doubles on each further retry.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    async fn extract_with_retry(
        &self,
        file: &UploadedFile,
        cancel: &CancellationToken,
    ) -> Result<Result<String, ExtractionError>, StepCancelled> {
        let mime_type = file.mime_type_or_default();
        let mut attempt = 0u32;
        loop {
            match self
                .extractor
                .extract_text(&file.bytes, mime_type, &file.file_name)
                .await
            {
                Err(e) if e.is_transient() && attempt < self.max_retries => {
                    let delay = self.backoff * 2u32.saturating_pow(attempt.min(5));
                    attempt += 1;
                    warn!(
                        file = %file.file_name,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying text extraction"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(StepCancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                other => return Ok(other),
            }
        }
    }
}

#[async_trait]
impl StepHandler for TextExtractionHandler {
    fn step_name(&self) -> &str {
        steps::TEXT_EXTRACTION
    }

    async fn invoke(&self, state: &mut DataPipelineResult, cancel: &CancellationToken) -> StepResult {
        let targets: Vec<(String, String)> = state
            .files_of_type(ArtifactType::Undefined)
            .filter(|f| !state.has_children(&f.id, ArtifactType::ExtractedText))
            .map(|f| (f.id.clone(), f.name.clone()))
            .collect();

        if targets.is_empty() {
            debug!("no uploads waiting for extraction");
            return Ok(StepOutcome::TemporarySkip);
        }

        for (file_id, file_name) in targets {
            ensure_not_cancelled(cancel)?;

            let extracted = match state.pending_upload(&file_id) {
                Some(pending) => self.extract_with_retry(&pending.file, cancel).await?,
                None => {
                    return Ok(StepOutcome::Failed(format!(
                        "no uploaded content for file '{}'",
                        file_name
                    )))
                }
            };

            let text = match extracted {
                Ok(text) => text,
                Err(e) => {
                    warn!(file = %file_name, error = %e, "text extraction failed");
                    return Ok(StepOutcome::Failed(format!("{}: {}", file_name, e)));
                }
            };

            let artifact = FileDetails::new(
                format!("{}.extract.txt", file_name),
                ArtifactType::ExtractedText,
                text.len() as u64,
                MIME_PLAIN_TEXT,
            )
            .with_parent(file_id);
            let key = keys::extracted_text(&artifact.id);
            info!(file = %file_name, chars = text.chars().count(), "extracted text");
            state.add_file(artifact);
            state.set_context(key, text);
        }

        Ok(StepOutcome::Success)
    }
}
