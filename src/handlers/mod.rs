//! Step handler contract and registry.
//!
//! Every pipeline stage implements [`StepHandler`]. The orchestrator looks
//! handlers up by step name in a [`HandlerRegistry`] and invokes them one
//! at a time against the run's [`DataPipelineResult`].
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                     HandlerRegistry                       │
//! │ text-extraction │ text-chunking │ generate-embeddings │ … │
//! └─────────────────────────────┬─────────────────────────────┘
//!                               ▼
//!           Orchestrator::run_pipeline(state, cancel)
//! ```
//!
//! # Outcomes
//!
//! | Return | Orchestrator reaction |
//! |--------|-----------------------|
//! | `Ok(StepOutcome::Success)` | continue with the next step |
//! | `Ok(StepOutcome::TemporarySkip)` | continue with the next step |
//! | `Ok(StepOutcome::Failed(reason))` | stop; the run fails |
//! | `Err(StepCancelled)` | stop; the run is cancelled |
//!
//! Handlers must be idempotent over the artifacts and context keys they
//! own: invoking a handler twice on the same state must not duplicate
//! `files` entries.

pub mod chunking;
pub mod embeddings;
pub mod extraction;
pub mod save;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use memflow_core::embedding::EmbeddingGenerator;
use memflow_core::models::FileDetails;
use memflow_core::state::DataPipelineResult;
use memflow_core::store::MemoryStore;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::extract::TextExtractor;

pub use chunking::{SemanticChunkingHandler, SimpleChunkingHandler};
pub use embeddings::GenerateEmbeddingsHandler;
pub use extraction::TextExtractionHandler;
pub use save::SaveRecordsHandler;

/// Stable step identities.
pub mod steps {
    pub const TEXT_EXTRACTION: &str = "text-extraction";
    pub const TEXT_CHUNKING: &str = "text-chunking";
    pub const GENERATE_EMBEDDINGS: &str = "generate-embeddings";
    pub const SAVE_RECORDS: &str = "save-records";

    /// The standard pipeline, in execution order.
    pub const DEFAULT_PIPELINE: [&str; 4] = [
        TEXT_EXTRACTION,
        TEXT_CHUNKING,
        GENERATE_EMBEDDINGS,
        SAVE_RECORDS,
    ];
}

/// What a handler reports after running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step did its work; continue.
    Success,
    /// The step had nothing to do this time; continue.
    TemporarySkip,
    /// The step could not do its work; abort the run.
    Failed(String),
}

/// Returned by a handler that observed cancellation mid-step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepCancelled;

impl fmt::Display for StepCancelled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "step cancelled")
    }
}

impl std::error::Error for StepCancelled {}

/// Result of one handler invocation.
pub type StepResult = std::result::Result<StepOutcome, StepCancelled>;

/// Return `Err(StepCancelled)` from the enclosing handler if `cancel` fired.
pub fn ensure_not_cancelled(cancel: &CancellationToken) -> std::result::Result<(), StepCancelled> {
    if cancel.is_cancelled() {
        Err(StepCancelled)
    } else {
        Ok(())
    }
}

/// Follow `parent_id` links from `file` back to the uploaded original.
pub(crate) fn origin_of<'a>(
    state: &'a DataPipelineResult,
    file: &'a FileDetails,
) -> &'a FileDetails {
    let mut current = file;
    // Bounded by the artifact count so a malformed parent cycle terminates.
    for _ in 0..state.files.len() {
        match current.parent_id.as_deref().and_then(|id| state.file(id)) {
            Some(parent) => current = parent,
            None => break,
        }
    }
    current
}

/// A pipeline stage.
///
/// # Example
///
/// ```rust
/// use async_trait::async_trait;
/// use memflow::handlers::{StepHandler, StepOutcome, StepResult};
/// use memflow_core::state::DataPipelineResult;
/// use tokio_util::sync::CancellationToken;
///
/// pub struct StampHandler;
///
/// #[async_trait]
/// impl StepHandler for StampHandler {
///     fn step_name(&self) -> &str { "stamp" }
///
///     async fn invoke(
///         &self,
///         state: &mut DataPipelineResult,
///         _cancel: &CancellationToken,
///     ) -> StepResult {
///         state.tags.insert("stamped".to_string(), "yes".to_string());
///         Ok(StepOutcome::Success)
///     }
/// }
/// ```
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// The name this handler is registered and ordered under.
    fn step_name(&self) -> &str;

    /// Run the step against `state`.
    ///
    /// Long-running handlers should check `cancel` between units of work
    /// (files, batches) and return `Err(StepCancelled)` when it fires.
    async fn invoke(&self, state: &mut DataPipelineResult, cancel: &CancellationToken)
        -> StepResult;
}

/// Step name → handler mapping, built once and shared read-only.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn StepHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its [`step_name`](StepHandler::step_name),
    /// replacing any handler already registered under that name.
    pub fn register(&mut self, handler: Arc<dyn StepHandler>) -> &mut Self {
        self.handlers
            .insert(handler.step_name().to_string(), handler);
        self
    }

    pub fn resolve(&self, step_name: &str) -> Option<Arc<dyn StepHandler>> {
        self.handlers.get(step_name).cloned()
    }

    pub fn contains(&self, step_name: &str) -> bool {
        self.handlers.contains_key(step_name)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Sorted names of all registered steps.
    pub fn step_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    /// Build the standard four-step registry from configuration.
    ///
    /// `pipeline.chunker` decides whether the simple or the structure-aware
    /// chunker is registered as `text-chunking`.
    pub fn from_config(
        config: &Config,
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn EmbeddingGenerator>,
        store: Arc<dyn MemoryStore>,
    ) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(TextExtractionHandler::new(
            extractor,
            config.extraction.max_retries,
        )));
        match config.pipeline.chunker.as_str() {
            "simple" => registry.register(Arc::new(SimpleChunkingHandler::new(
                config.chunking.clone(),
            ))),
            "semantic" => registry.register(Arc::new(SemanticChunkingHandler::new(
                config.semantic_chunking.clone(),
            ))),
            other => anyhow::bail!("Unknown chunker: '{}'", other),
        };
        registry.register(Arc::new(GenerateEmbeddingsHandler::new(
            embedder,
            config.embedding.batch_size,
        )));
        registry.register(Arc::new(SaveRecordsHandler::new(store)));
        Ok(registry)
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("steps", &self.step_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::PlainTextExtractor;
    use memflow_core::embedding::HashEmbedder;
    use memflow_core::store::memory::InMemoryStore;

    struct Named(&'static str);

    #[async_trait]
    impl StepHandler for Named {
        fn step_name(&self) -> &str {
            self.0
        }

        async fn invoke(
            &self,
            _state: &mut DataPipelineResult,
            _cancel: &CancellationToken,
        ) -> StepResult {
            Ok(StepOutcome::Success)
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Named("a"))).register(Arc::new(Named("b")));
        assert_eq!(registry.len(), 2);
        assert!(registry.resolve("a").is_some());
        assert!(registry.resolve("missing").is_none());
        assert_eq!(registry.step_names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_later_registration_replaces() {
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(Named("a")));
        registry.register(Arc::new(Named("a")));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_from_config_registers_default_steps() {
        let registry = HandlerRegistry::from_config(
            &Config::default(),
            Arc::new(PlainTextExtractor),
            Arc::new(HashEmbedder::new(8)),
            Arc::new(InMemoryStore::new()),
        )
        .unwrap();
        for step in steps::DEFAULT_PIPELINE {
            assert!(registry.contains(step), "missing {}", step);
        }
    }

    #[test]
    fn test_origin_of_walks_parents() {
        use memflow_core::models::ArtifactType;

        let mut state = DataPipelineResult::new("d", "e", "i", vec![]);
        let root = FileDetails::new("a.pdf", ArtifactType::Undefined, 1, "application/pdf");
        let text = FileDetails::new("a.pdf.extract.txt", ArtifactType::ExtractedText, 1, "text/plain")
            .with_parent(root.id.clone());
        let part = FileDetails::new("a.pdf.partition.0.txt", ArtifactType::TextPartition, 1, "text/plain")
            .with_parent(text.id.clone());
        state.add_file(root);
        state.add_file(text);
        state.add_file(part.clone());
        assert_eq!(origin_of(&state, &part).name, "a.pdf");
    }

    #[test]
    fn test_ensure_not_cancelled() {
        let token = CancellationToken::new();
        assert!(ensure_not_cancelled(&token).is_ok());
        token.cancel();
        assert_eq!(ensure_not_cancelled(&token), Err(StepCancelled));
    }
}
