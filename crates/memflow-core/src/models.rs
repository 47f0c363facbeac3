//! Core data models used throughout memflow.
//!
//! These types represent the uploaded files, the artifacts a pipeline run
//! derives from them, the chunks produced by the chunking engines, and the
//! embedded records handed to storage.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// MIME type used when nothing better is known about a payload.
pub const MIME_OCTET_STREAM: &str = "application/octet-stream";
/// MIME type recorded for extracted text and text partitions.
pub const MIME_PLAIN_TEXT: &str = "text/plain";

/// A named byte payload attached to an upload request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub file_name: String,
    pub content: Vec<u8>,
    pub size: u64,
    pub mime_type: String,
    pub tags: BTreeMap<String, String>,
}

/// A file attached to a request before the pipeline assigns it an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>, mime_type: Option<String>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes,
            mime_type,
        }
    }

    /// The declared MIME type, or [`MIME_OCTET_STREAM`] when absent.
    pub fn mime_type_or_default(&self) -> &str {
        self.mime_type.as_deref().unwrap_or(MIME_OCTET_STREAM)
    }
}

/// The kind of artifact a [`FileDetails`] entry describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    /// An uploaded original whose content has not been interpreted yet.
    #[default]
    Undefined,
    ExtractedText,
    TextPartition,
    Embedding,
    Other,
}

impl ArtifactType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Undefined => "undefined",
            ArtifactType::ExtractedText => "extracted_text",
            ArtifactType::TextPartition => "text_partition",
            ArtifactType::Embedding => "embedding",
            ArtifactType::Other => "other",
        }
    }
}

/// An artifact tracked by a pipeline run.
///
/// Entries are append-only: a step that derives something from an
/// artifact adds a new entry pointing back at it through `parent_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDetails {
    pub id: String,
    pub name: String,
    pub artifact_type: ArtifactType,
    pub size: u64,
    pub mime_type: String,
    /// The artifact this one was derived from; `None` for uploaded originals.
    pub parent_id: Option<String>,
    pub partition_number: Option<usize>,
    pub section_number: Option<usize>,
}

impl FileDetails {
    /// Create an artifact with a fresh UUID.
    pub fn new(
        name: impl Into<String>,
        artifact_type: ArtifactType,
        size: u64,
        mime_type: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            artifact_type,
            size,
            mime_type: mime_type.into(),
            parent_id: None,
            partition_number: None,
            section_number: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_partition(mut self, partition_number: usize, section_number: usize) -> Self {
        self.partition_number = Some(partition_number);
        self.section_number = Some(section_number);
        self
    }
}

/// A unit of text prepared for embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    /// Zero-based position of the chunk within its source text.
    pub chunk_number: usize,
    /// Placeholder score; retrieval fills it in, ingestion leaves it at 0.
    pub relevance: f32,
    pub last_update: DateTime<Utc>,
    pub tags: BTreeMap<String, Option<String>>,
    /// Structural section the chunk starts in (0 = preamble / unstructured).
    pub section_number: usize,
}

impl Chunk {
    pub fn new(text: impl Into<String>, chunk_number: usize, section_number: usize) -> Self {
        Self {
            text: text.into(),
            chunk_number,
            relevance: 0.0,
            last_update: Utc::now(),
            tags: BTreeMap::new(),
            section_number,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: Option<String>) -> Self {
        self.tags.insert(key.into(), value);
        self
    }

    /// Length of the chunk text in characters.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// The final embedded unit handed to the storage collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    pub id: String,
    pub document_id: String,
    pub execution_id: String,
    pub index: String,
    pub file_name: String,
    pub text: String,
    pub artifact_type: ArtifactType,
    pub partition_number: usize,
    pub section_number: usize,
    pub tags: BTreeMap<String, Vec<String>>,
    pub created_at: DateTime<Utc>,
    pub embedding: Vec<f32>,
}
