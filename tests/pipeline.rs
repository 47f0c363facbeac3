//! End-to-end orchestrator tests with custom and built-in handlers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use memflow::config::{parse_config, Config};
use memflow::extract::PlainTextExtractor;
use memflow::handlers::{steps, HandlerRegistry, StepHandler, StepOutcome, StepResult};
use memflow::{Orchestrator, PipelineError, UploadRequest};
use memflow_core::embedding::HashEmbedder;
use memflow_core::models::{ArtifactType, MemoryRecord};
use memflow_core::state::{keys, DataPipelineResult};
use memflow_core::store::memory::InMemoryStore;
use memflow_core::store::MemoryStore;

type Journal = Arc<Mutex<Vec<String>>>;

/// Appends its name to a shared journal, then reports `outcome`.
struct Recording {
    name: String,
    journal: Journal,
    outcome: StepOutcome,
}

#[async_trait]
impl StepHandler for Recording {
    fn step_name(&self) -> &str {
        &self.name
    }

    async fn invoke(&self, _state: &mut DataPipelineResult, _cancel: &CancellationToken) -> StepResult {
        self.journal.lock().unwrap().push(self.name.clone());
        Ok(self.outcome.clone())
    }
}

/// Commits the write, then cancels the run before returning.
struct CancelAfterCommit {
    inner: Arc<InMemoryStore>,
    cancel: CancellationToken,
}

#[async_trait]
impl MemoryStore for CancelAfterCommit {
    async fn upsert(&self, index: &str, records: Vec<MemoryRecord>) -> anyhow::Result<()> {
        self.inner.upsert(index, records).await?;
        self.cancel.cancel();
        tokio::task::yield_now().await;
        Ok(())
    }
}

/// Never finishes on its own and ignores the token.
struct Stuck;

#[async_trait]
impl StepHandler for Stuck {
    fn step_name(&self) -> &str {
        "stuck"
    }

    async fn invoke(&self, _state: &mut DataPipelineResult, _cancel: &CancellationToken) -> StepResult {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(StepOutcome::Success)
    }
}

fn recording(name: &str, journal: &Journal, outcome: StepOutcome) -> Arc<Recording> {
    Arc::new(Recording {
        name: name.to_string(),
        journal: journal.clone(),
        outcome,
    })
}

fn steps_of(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

fn one_file_request() -> UploadRequest {
    UploadRequest::builder()
        .add_file_bytes("a.txt", b"hello".to_vec(), None)
        .build()
        .unwrap()
}

fn default_orchestrator(config: &Config, store: Arc<InMemoryStore>) -> Orchestrator {
    let registry = HandlerRegistry::from_config(
        config,
        Arc::new(PlainTextExtractor),
        Arc::new(HashEmbedder::new(32)),
        store,
    )
    .unwrap();
    Orchestrator::new(Arc::new(registry), config.pipeline.steps.clone())
}

#[tokio::test]
async fn steps_run_in_declared_order() {
    let journal: Journal = Arc::default();
    let mut registry = HandlerRegistry::new();
    registry
        .register(recording("one", &journal, StepOutcome::Success))
        .register(recording("two", &journal, StepOutcome::TemporarySkip))
        .register(recording("three", &journal, StepOutcome::Success));
    let orchestrator = Orchestrator::new(Arc::new(registry), steps_of(&["three", "one", "two"]));

    let state = orchestrator
        .process_upload("idx", one_file_request(), &CancellationToken::new())
        .await
        .unwrap();

    assert!(state.complete);
    assert_eq!(*journal.lock().unwrap(), steps_of(&["three", "one", "two"]));
    assert_eq!(state.completed_steps, steps_of(&["three", "one", "two"]));
}

#[tokio::test]
async fn failure_stops_later_steps() {
    let journal: Journal = Arc::default();
    let mut registry = HandlerRegistry::new();
    registry
        .register(recording("one", &journal, StepOutcome::Success))
        .register(recording("two", &journal, StepOutcome::Failed("bad input".into())))
        .register(recording("three", &journal, StepOutcome::Success));
    let orchestrator = Orchestrator::new(Arc::new(registry), steps_of(&["one", "two", "three"]));

    let state = orchestrator.prepare_new_upload("idx", one_file_request()).unwrap();
    let err = orchestrator
        .run_pipeline(state, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.error.failed_step(), Some("two"));
    assert!(err.to_string().contains("bad input"));
    assert!(!err.state.complete);
    assert_eq!(err.state.completed_steps, steps_of(&["one"]));
    assert_eq!(*journal.lock().unwrap(), steps_of(&["one", "two"]));
}

#[tokio::test]
async fn unknown_step_is_rejected_before_any_handler_runs() {
    let journal: Journal = Arc::default();
    let mut registry = HandlerRegistry::new();
    registry.register(recording("one", &journal, StepOutcome::Success));
    let orchestrator = Orchestrator::new(Arc::new(registry), steps_of(&["one", "missing"]));

    let err = orchestrator
        .process_upload("idx", one_file_request(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Configuration(ref m) if m.contains("missing")));
    assert!(journal.lock().unwrap().is_empty());
}

#[tokio::test]
async fn save_must_be_the_final_step() {
    let journal: Journal = Arc::default();
    let mut registry = HandlerRegistry::new();
    registry
        .register(recording(steps::SAVE_RECORDS, &journal, StepOutcome::Success))
        .register(recording("after", &journal, StepOutcome::Success));
    let orchestrator =
        Orchestrator::new(Arc::new(registry), steps_of(&[steps::SAVE_RECORDS, "after"]));

    let err = orchestrator
        .process_upload("idx", one_file_request(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Configuration(_)));
    assert!(journal.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_before_run_executes_nothing() {
    let journal: Journal = Arc::default();
    let mut registry = HandlerRegistry::new();
    registry.register(recording("one", &journal, StepOutcome::Success));
    let orchestrator = Orchestrator::new(Arc::new(registry), steps_of(&["one"]));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let state = orchestrator.prepare_new_upload("idx", one_file_request()).unwrap();
    let err = orchestrator.run_pipeline(state, &cancel).await.unwrap_err();

    assert!(err.is_cancelled());
    assert!(err.state.completed_steps.is_empty());
    assert!(journal.lock().unwrap().is_empty());
}

#[tokio::test]
async fn cancellation_interrupts_a_running_step() {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(Stuck));
    let orchestrator = Orchestrator::new(Arc::new(registry), steps_of(&["stuck"]));

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        trigger.cancel();
    });

    let state = orchestrator.prepare_new_upload("idx", one_file_request()).unwrap();
    let result = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.run_pipeline(state, &cancel),
    )
    .await
    .expect("cancellation should stop the run promptly");

    let err = result.unwrap_err();
    assert!(err.is_cancelled());
    assert!(!err.state.complete);
}

#[tokio::test]
async fn default_pipeline_stores_embedded_records() {
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = default_orchestrator(&Config::default(), store.clone());

    let request = UploadRequest::builder()
        .add_file_bytes("a.txt", b"Alpha text about cargo and crates.".to_vec(), None)
        .add_file_bytes("b.md", b"# Beta\n\nNotes on deployment.".to_vec(), None)
        .add_tag("team", "docs")
        .build()
        .unwrap();

    let state = orchestrator
        .process_upload("notes", request, &CancellationToken::new())
        .await
        .unwrap();

    assert!(state.complete);
    assert_eq!(state.files_of_type(ArtifactType::ExtractedText).count(), 2);
    let partitions = state.files_of_type(ArtifactType::TextPartition).count();
    assert_eq!(state.files_of_type(ArtifactType::Embedding).count(), partitions);
    assert!(state.dangling_context_keys().is_empty());

    let records = store.records("notes");
    assert_eq!(records.len(), partitions);
    for record in &records {
        assert_eq!(record.document_id, state.document_id);
        assert_eq!(record.embedding.len(), 32);
        assert_eq!(record.tags["team"], vec!["docs".to_string()]);
    }
    let names: Vec<_> = records.iter().map(|r| r.file_name.as_str()).collect();
    assert!(names.contains(&"a.txt") && names.contains(&"b.md"));
}

#[tokio::test]
async fn semantic_pipeline_records_sections() {
    let config = parse_config(
        r#"
        [pipeline]
        chunker = "semantic"

        [semantic_chunking]
        min_chunk_size = 0
        text_overlap = 0
        "#,
    )
    .unwrap();
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = default_orchestrator(&config, store.clone());

    let request = UploadRequest::builder()
        .add_file_bytes("guide.md", b"# Install\n\nRun the installer.\n\n# Use\n\nOpen the app.".to_vec(), None)
        .build()
        .unwrap();
    orchestrator
        .process_upload("guides", request, &CancellationToken::new())
        .await
        .unwrap();

    let records = store.records("guides");
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].text, "Install\n\nRun the installer.");
    assert_eq!(records[1].tags["section"], vec!["Use".to_string()]);
    assert!(records[0].section_number < records[1].section_number);
}

#[tokio::test]
async fn empty_file_gets_a_placeholder_record() {
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = default_orchestrator(&Config::default(), store.clone());

    let request = UploadRequest::builder()
        .add_file_bytes("empty.txt", Vec::new(), None)
        .build()
        .unwrap();
    orchestrator
        .process_upload("idx", request, &CancellationToken::new())
        .await
        .unwrap();

    let records = store.records("idx");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].tags["fallback"], vec!["empty-text".to_string()]);
}

#[tokio::test]
async fn unsupported_format_fails_extraction_and_saves_nothing() {
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = default_orchestrator(&Config::default(), store.clone());

    let request = UploadRequest::builder()
        .add_file_bytes("scan.pdf", b"%PDF-1.7".to_vec(), None)
        .build()
        .unwrap();
    let err = orchestrator
        .process_upload("idx", request, &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.failed_step(), Some(steps::TEXT_EXTRACTION));
    assert_eq!(store.count("idx"), 0);
}

#[tokio::test]
async fn rerunning_a_state_does_not_duplicate_artifacts() {
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = default_orchestrator(&Config::default(), store.clone());

    let state = orchestrator
        .process_upload("idx", one_file_request(), &CancellationToken::new())
        .await
        .unwrap();
    let files_before = state.files.len();

    // Reset progress so every step runs again over the same artifacts.
    let mut again = state;
    again.completed_steps.clear();
    again.complete = false;
    let again = orchestrator
        .run_pipeline(again, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(again.files.len(), files_before);
    assert_eq!(store.count("idx"), 1);
}

#[tokio::test]
async fn failed_run_resumes_after_last_completed_step() {
    let journal: Journal = Arc::default();
    let mut registry = HandlerRegistry::new();
    registry
        .register(recording("one", &journal, StepOutcome::Success))
        .register(recording("two", &journal, StepOutcome::Failed("flaky".into())));
    let orchestrator = Orchestrator::new(Arc::new(registry), steps_of(&["one", "two"]));

    let state = orchestrator.prepare_new_upload("idx", one_file_request()).unwrap();
    let err = orchestrator
        .run_pipeline(state, &CancellationToken::new())
        .await
        .unwrap_err();
    let (_, state) = err.into_parts();

    let mut fixed = HandlerRegistry::new();
    fixed
        .register(recording("one", &journal, StepOutcome::Success))
        .register(recording("two", &journal, StepOutcome::Success));
    let orchestrator = Orchestrator::new(Arc::new(fixed), steps_of(&["one", "two"]));
    let state = orchestrator
        .run_pipeline(state, &CancellationToken::new())
        .await
        .unwrap();

    assert!(state.complete);
    assert_eq!(*journal.lock().unwrap(), steps_of(&["one", "two", "two"]));
}

#[tokio::test]
async fn upload_file_reads_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.md");
    std::fs::write(&path, "# Notes\n\nSome notes on the release.").unwrap();

    let store = Arc::new(InMemoryStore::new());
    let orchestrator = default_orchestrator(&Config::default(), store.clone());
    let state = orchestrator
        .upload_file("idx", &path, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(state.files[0].name, "notes.md");
    assert_eq!(state.files[0].mime_type, "text/markdown");
    let extracted = state
        .files_of_type(ArtifactType::ExtractedText)
        .next()
        .unwrap();
    assert_eq!(
        state.context_text(&keys::extracted_text(&extracted.id)),
        Some("# Notes\n\nSome notes on the release.")
    );
    assert_eq!(store.count("idx"), 1);
}

#[tokio::test]
async fn independent_runs_share_one_orchestrator() {
    let store = Arc::new(InMemoryStore::new());
    let orchestrator = default_orchestrator(&Config::default(), store.clone());

    let mut tasks = Vec::new();
    for i in 0..4 {
        let orchestrator = orchestrator.clone();
        tasks.push(tokio::spawn(async move {
            let request = UploadRequest::builder()
                .add_file_bytes(format!("f{}.txt", i), format!("document {}", i).into_bytes(), None)
                .build()
                .unwrap();
            orchestrator
                .process_upload("shared", request, &CancellationToken::new())
                .await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().unwrap().complete);
    }
    assert_eq!(store.count("shared"), 4);
}

#[tokio::test]
async fn empty_request_is_a_validation_error() {
    let err = UploadRequest::builder().build().unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));
}

#[tokio::test]
async fn save_step_finishes_once_records_are_written() {
    let config = Config::default();
    let inner = Arc::new(InMemoryStore::new());
    let cancel = CancellationToken::new();
    let store = Arc::new(CancelAfterCommit {
        inner: inner.clone(),
        cancel: cancel.clone(),
    });
    let registry = HandlerRegistry::from_config(
        &config,
        Arc::new(PlainTextExtractor),
        Arc::new(HashEmbedder::new(32)),
        store,
    )
    .unwrap();
    let orchestrator = Orchestrator::new(Arc::new(registry), config.pipeline.steps.clone());

    let state = orchestrator.prepare_new_upload("idx", one_file_request()).unwrap();
    let state = orchestrator.run_pipeline(state, &cancel).await.unwrap();

    assert!(cancel.is_cancelled());
    assert!(state.complete);
    assert_eq!(state.completed_steps.last().map(String::as_str), Some(steps::SAVE_RECORDS));
    assert_eq!(inner.count("idx"), 1);
}
