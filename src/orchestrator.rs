//! Pipeline orchestration.
//!
//! The [`Orchestrator`] turns an [`UploadRequest`] into a
//! [`DataPipelineResult`] and drives it through the configured steps.
//!
//! # Algorithm
//!
//! 1. **Prepare**: validate the index, assign document and execution ids,
//!    register every uploaded file as an `Undefined` artifact with a
//!    matching pending upload, copy tags and context entries.
//! 2. **Resolve**: look up a handler for every step name before running
//!    anything. An unknown step, or `save-records` anywhere but last, is a
//!    configuration error and no handler runs.
//! 3. **Execute**: for each remaining step, check cancellation, then race
//!    the handler against the cancellation token. `save-records` is
//!    awaited to completion once started, so a run that wrote records
//!    always ends `complete`.
//!    - `Success` / `TemporarySkip` → record the step, continue
//!    - `Failed(reason)` → stop with [`PipelineError::HandlerFailure`]
//!    - cancelled → stop with [`PipelineError::Cancelled`]
//! 4. **Complete**: mark the state `complete`.
//!
//! Stopped runs hand their partial state back inside a
//! [`PipelineRunError`]; nothing is rolled back. Passing that state to
//! [`Orchestrator::run_pipeline`] again resumes after the last recorded
//! step.
//!
//! The orchestrator never retries a step. Retrying transient collaborator
//! failures is the handlers' business.

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use memflow_core::models::{ArtifactType, FileDetails};
use memflow_core::state::{DataPipelineResult, PendingUpload};

use crate::error::{PipelineError, PipelineRunError, Result};
use crate::handlers::{steps, HandlerRegistry, StepCancelled, StepHandler, StepOutcome};
use crate::upload::UploadRequest;

/// Sequences step handlers over pipeline states.
///
/// Cheap to clone; clones share the registry, so independent runs can be
/// spawned onto separate tasks.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    registry: Arc<HandlerRegistry>,
    steps: Vec<String>,
}

impl Orchestrator {
    /// `steps` is the default step list for requests without an override.
    pub fn new(registry: Arc<HandlerRegistry>, steps: Vec<String>) -> Self {
        Self { registry, steps }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }

    /// Build the initial state for `request`.
    pub fn prepare_new_upload(&self, index: &str, request: UploadRequest) -> Result<DataPipelineResult> {
        let index = index.trim();
        if index.is_empty() {
            return Err(PipelineError::validation("index must not be empty"));
        }
        if request.files().is_empty() {
            return Err(PipelineError::validation(
                "an upload request needs at least one file",
            ));
        }

        let steps = request
            .steps()
            .map(<[String]>::to_vec)
            .unwrap_or_else(|| self.steps.clone());
        if steps.is_empty() {
            return Err(PipelineError::configuration("no pipeline steps configured"));
        }

        let document_id = request
            .document_id()
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut state = DataPipelineResult::new(
            document_id,
            Uuid::new_v4().to_string(),
            index,
            steps,
        );
        state.tags = request.tags().clone();
        state.context_arguments = request.context().clone();

        for file in request.into_files() {
            let details = FileDetails::new(
                file.file_name.clone(),
                ArtifactType::Undefined,
                file.bytes.len() as u64,
                file.mime_type_or_default(),
            );
            state.files_to_upload.push(PendingUpload {
                file_id: details.id.clone(),
                file,
            });
            state.add_file(details);
        }

        debug!(
            document_id = %state.document_id,
            files = state.files.len(),
            "prepared upload"
        );
        Ok(state)
    }

    /// Resolve every step up front and check step placement.
    fn resolve_steps(&self, step_names: &[String]) -> Result<Vec<Arc<dyn StepHandler>>> {
        let last = step_names.len().saturating_sub(1);
        if let Some(pos) = step_names
            .iter()
            .enumerate()
            .position(|(i, s)| s == steps::SAVE_RECORDS && i != last)
        {
            return Err(PipelineError::configuration(format!(
                "'{}' must be the final step, found at position {} of {}",
                steps::SAVE_RECORDS,
                pos + 1,
                step_names.len()
            )));
        }

        step_names
            .iter()
            .map(|name| {
                self.registry.resolve(name).ok_or_else(|| {
                    PipelineError::configuration(format!(
                        "no handler registered for step '{}'",
                        name
                    ))
                })
            })
            .collect()
    }

    /// Drive `state` through its remaining steps.
    #[instrument(
        name = "pipeline_run",
        skip(self, state, cancel),
        fields(document_id = %state.document_id, execution_id = %state.execution_id)
    )]
    pub async fn run_pipeline(
        &self,
        mut state: DataPipelineResult,
        cancel: &CancellationToken,
    ) -> std::result::Result<DataPipelineResult, PipelineRunError> {
        let handlers = match self.resolve_steps(&state.steps) {
            Ok(handlers) => handlers,
            Err(e) => return Err(PipelineRunError::new(e, state)),
        };
        let step_names = state.steps.clone();
        let done = state.completed_steps.len();

        info!(index = %state.index, steps = step_names.len(), "pipeline started");

        for (name, handler) in step_names.iter().zip(handlers).skip(done) {
            if cancel.is_cancelled() {
                info!(step = %name, "pipeline cancelled before step");
                return Err(PipelineRunError::new(PipelineError::Cancelled, state));
            }

            debug!(step = %name, "running step");
            let result = if name.as_str() == steps::SAVE_RECORDS {
                // a committed write must not be reported as cancelled
                handler.invoke(&mut state, cancel).await
            } else {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(StepCancelled),
                    r = handler.invoke(&mut state, cancel) => r,
                }
            };

            match result {
                Ok(StepOutcome::Success) => {
                    debug!(step = %name, "step succeeded");
                }
                Ok(StepOutcome::TemporarySkip) => {
                    debug!(step = %name, "step skipped");
                }
                Ok(StepOutcome::Failed(reason)) => {
                    warn!(step = %name, reason = %reason, "step failed");
                    state.touch();
                    return Err(PipelineRunError::new(
                        PipelineError::handler_failure(name.as_str(), reason),
                        state,
                    ));
                }
                Err(StepCancelled) => {
                    info!(step = %name, "pipeline cancelled during step");
                    state.touch();
                    return Err(PipelineRunError::new(PipelineError::Cancelled, state));
                }
            }
            state.completed_steps.push(name.clone());
            state.touch();
        }

        state.complete = true;
        state.touch();
        info!(files = state.files.len(), "pipeline completed");
        Ok(state)
    }

    /// Prepare and run `request` against `index`.
    pub async fn process_upload(
        &self,
        index: &str,
        request: UploadRequest,
        cancel: &CancellationToken,
    ) -> Result<DataPipelineResult> {
        let state = self.prepare_new_upload(index, request)?;
        Ok(self.run_pipeline(state, cancel).await?)
    }

    /// Ingest one file from disk.
    pub async fn upload_file(
        &self,
        index: &str,
        path: impl AsRef<Path>,
        cancel: &CancellationToken,
    ) -> Result<DataPipelineResult> {
        let request = UploadRequest::builder()
            .add_file_path_async(path)
            .await?
            .build()?;
        self.process_upload(index, request, cancel).await
    }

    /// Ingest several files from disk as one document.
    pub async fn upload_files<P>(
        &self,
        index: &str,
        paths: &[P],
        cancel: &CancellationToken,
    ) -> Result<DataPipelineResult>
    where
        P: AsRef<Path>,
    {
        let mut builder = UploadRequest::builder();
        for path in paths {
            builder = builder.add_file_path_async(path).await?;
        }
        self.process_upload(index, builder.build()?, cancel).await
    }
}
