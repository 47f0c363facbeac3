//! Pipeline state threaded through one run.
//!
//! A [`DataPipelineResult`] is created when an upload is prepared, handed
//! to each step handler in turn, and discarded when the run ends. Steps
//! communicate through two channels:
//!
//! - `files`: the append-only list of artifacts produced so far;
//! - `context_arguments`: a typed scratch blackboard keyed by convention
//!   (see [`keys`]) for payloads too large or too step-specific to widen
//!   the state schema with.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{ArtifactType, FileDetails, UploadedFile};

/// Well-known `context_arguments` key builders.
pub mod keys {
    pub const EXTRACTED_TEXT_PREFIX: &str = "extracted_text_";
    pub const CHUNK_TEXT_PREFIX: &str = "chunk_text_";
    pub const EMBEDDING_PREFIX: &str = "embedding_";
    pub const CHUNK_TAGS_PREFIX: &str = "chunk_tags_";

    pub fn extracted_text(file_id: &str) -> String {
        format!("{}{}", EXTRACTED_TEXT_PREFIX, file_id)
    }

    pub fn chunk_text(file_id: &str) -> String {
        format!("{}{}", CHUNK_TEXT_PREFIX, file_id)
    }

    pub fn embedding(file_id: &str) -> String {
        format!("{}{}", EMBEDDING_PREFIX, file_id)
    }

    /// Chunk tags of a text partition, stored as a JSON object.
    pub fn chunk_tags(file_id: &str) -> String {
        format!("{}{}", CHUNK_TAGS_PREFIX, file_id)
    }

    /// Returns the file id embedded in a well-known key, if it is one.
    pub fn referenced_file_id(key: &str) -> Option<&str> {
        [
            EXTRACTED_TEXT_PREFIX,
            CHUNK_TEXT_PREFIX,
            EMBEDDING_PREFIX,
            CHUNK_TAGS_PREFIX,
        ]
        .iter()
        .find_map(|prefix| key.strip_prefix(prefix))
    }
}

/// A typed blackboard value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ContextValue {
    Text(String),
    Vector(Vec<f32>),
    Number(f64),
    Json(serde_json::Value),
}

impl ContextValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContextValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f32]> {
        match self {
            ContextValue::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            ContextValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            ContextValue::Json(v) => Some(v),
            _ => None,
        }
    }
}

impl From<String> for ContextValue {
    fn from(s: String) -> Self {
        ContextValue::Text(s)
    }
}

impl From<&str> for ContextValue {
    fn from(s: &str) -> Self {
        ContextValue::Text(s.to_string())
    }
}

impl From<Vec<f32>> for ContextValue {
    fn from(v: Vec<f32>) -> Self {
        ContextValue::Vector(v)
    }
}

impl From<f64> for ContextValue {
    fn from(n: f64) -> Self {
        ContextValue::Number(n)
    }
}

impl From<serde_json::Value> for ContextValue {
    fn from(v: serde_json::Value) -> Self {
        ContextValue::Json(v)
    }
}

/// An uploaded file still waiting to be extracted, paired with the id of
/// its `Undefined` artifact in `files`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingUpload {
    pub file_id: String,
    pub file: UploadedFile,
}

/// The mutable context of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPipelineResult {
    pub document_id: String,
    pub execution_id: String,
    /// Target namespace in the storage collaborator.
    pub index: String,
    pub complete: bool,
    /// Step names to execute, in order.
    pub steps: Vec<String>,
    /// Step names that finished with `Success` or `TemporarySkip`, in
    /// execution order. A resumed run starts after the last of these.
    pub completed_steps: Vec<String>,
    pub files: Vec<FileDetails>,
    pub files_to_upload: Vec<PendingUpload>,
    pub tags: BTreeMap<String, String>,
    pub context_arguments: BTreeMap<String, ContextValue>,
    pub creation: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

impl DataPipelineResult {
    /// Create an empty, incomplete state.
    pub fn new(
        document_id: impl Into<String>,
        execution_id: impl Into<String>,
        index: impl Into<String>,
        steps: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            document_id: document_id.into(),
            execution_id: execution_id.into(),
            index: index.into(),
            complete: false,
            steps,
            completed_steps: Vec::new(),
            files: Vec::new(),
            files_to_upload: Vec::new(),
            tags: BTreeMap::new(),
            context_arguments: BTreeMap::new(),
            creation: now,
            last_update: now,
        }
    }

    /// Steps that have not reported an outcome yet.
    pub fn remaining_steps(&self) -> &[String] {
        let done = self.completed_steps.len().min(self.steps.len());
        &self.steps[done..]
    }

    /// Append an artifact. Artifacts are never replaced or removed.
    pub fn add_file(&mut self, file: FileDetails) {
        self.files.push(file);
        self.touch();
    }

    pub fn file(&self, id: &str) -> Option<&FileDetails> {
        self.files.iter().find(|f| f.id == id)
    }

    pub fn files_of_type(&self, artifact_type: ArtifactType) -> impl Iterator<Item = &FileDetails> {
        self.files
            .iter()
            .filter(move |f| f.artifact_type == artifact_type)
    }

    /// Artifacts of the given type derived from `parent_id`.
    pub fn children_of<'a>(
        &'a self,
        parent_id: &'a str,
        artifact_type: ArtifactType,
    ) -> impl Iterator<Item = &'a FileDetails> + 'a {
        self.files.iter().filter(move |f| {
            f.artifact_type == artifact_type && f.parent_id.as_deref() == Some(parent_id)
        })
    }

    pub fn has_children(&self, parent_id: &str, artifact_type: ArtifactType) -> bool {
        self.children_of(parent_id, artifact_type).next().is_some()
    }

    pub fn pending_upload(&self, file_id: &str) -> Option<&PendingUpload> {
        self.files_to_upload.iter().find(|p| p.file_id == file_id)
    }

    pub fn set_context(&mut self, key: impl Into<String>, value: impl Into<ContextValue>) {
        self.context_arguments.insert(key.into(), value.into());
        self.touch();
    }

    pub fn context(&self, key: &str) -> Option<&ContextValue> {
        self.context_arguments.get(key)
    }

    pub fn context_text(&self, key: &str) -> Option<&str> {
        self.context(key).and_then(ContextValue::as_text)
    }

    pub fn context_vector(&self, key: &str) -> Option<&[f32]> {
        self.context(key).and_then(ContextValue::as_vector)
    }

    /// Well-known context keys whose file id is not present in `files`.
    ///
    /// Always empty for a state only touched by well-behaved handlers.
    pub fn dangling_context_keys(&self) -> Vec<&str> {
        self.context_arguments
            .keys()
            .filter(|key| match keys::referenced_file_id(key) {
                Some(id) => self.file(id).is_none(),
                None => false,
            })
            .map(String::as_str)
            .collect()
    }

    pub fn touch(&mut self) {
        self.last_update = Utc::now();
    }
}
