//! Upload requests and their fluent builder.
//!
//! An [`UploadRequest`] is the immutable input of one pipeline run: the
//! files to ingest (in insertion order), request tags, initial context
//! entries and optional overrides for the document id and step list.
//!
//! ```rust
//! use memflow::upload::UploadRequest;
//!
//! let request = UploadRequest::builder()
//!     .add_file_bytes("notes.md", b"# Notes\nhello".to_vec(), None)
//!     .add_tag("team", "docs")
//!     .build()
//!     .unwrap();
//! assert_eq!(request.files()[0].mime_type.as_deref(), Some("text/markdown"));
//! ```
//!
//! MIME types not given explicitly are inferred from the file extension,
//! falling back to `application/octet-stream`.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use tokio::io::{AsyncRead, AsyncReadExt};

use memflow_core::models::{Document, UploadedFile, MIME_OCTET_STREAM};
use memflow_core::state::{keys, ContextValue};

use crate::error::{PipelineError, Result};

/// Guess a MIME type from the extension of `file_name`.
pub fn infer_mime_type(file_name: &str) -> String {
    mime_guess::from_path(file_name)
        .first_raw()
        .unwrap_or(MIME_OCTET_STREAM)
        .to_string()
}

/// A validated, immutable ingestion request.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    files: Vec<UploadedFile>,
    documents: Vec<Document>,
    tags: BTreeMap<String, String>,
    context: BTreeMap<String, ContextValue>,
    document_id: Option<String>,
    steps: Option<Vec<String>>,
}

impl UploadRequest {
    pub fn builder() -> UploadRequestBuilder {
        UploadRequestBuilder::default()
    }

    pub fn files(&self) -> &[UploadedFile] {
        &self.files
    }

    /// One [`Document`] per file, carrying the request tags.
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    pub fn context(&self) -> &BTreeMap<String, ContextValue> {
        &self.context
    }

    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    /// Step list overriding the orchestrator's default, if any.
    pub fn steps(&self) -> Option<&[String]> {
        self.steps.as_deref()
    }

    pub fn into_files(self) -> Vec<UploadedFile> {
        self.files
    }
}

/// Accumulates files and metadata for an [`UploadRequest`].
#[derive(Debug, Default)]
pub struct UploadRequestBuilder {
    files: Vec<UploadedFile>,
    tags: BTreeMap<String, String>,
    context: BTreeMap<String, ContextValue>,
    document_id: Option<String>,
    steps: Option<Vec<String>>,
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PipelineError::validation(format!("not a file path: {}", path.display())))
}

impl UploadRequestBuilder {
    pub fn add_file_bytes(
        mut self,
        file_name: impl Into<String>,
        bytes: Vec<u8>,
        mime_type: Option<&str>,
    ) -> Self {
        let file_name = file_name.into();
        let mime_type = mime_type
            .map(str::to_string)
            .unwrap_or_else(|| infer_mime_type(&file_name));
        self.files
            .push(UploadedFile::new(file_name, bytes, Some(mime_type)));
        self
    }

    /// Read a file from disk; the file name is the path's last component.
    pub fn add_file_path(self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = file_name_of(path)?;
        let bytes = std::fs::read(path)?;
        Ok(self.add_file_bytes(name, bytes, None))
    }

    pub fn add_reader(
        self,
        file_name: impl Into<String>,
        mut reader: impl Read,
        mime_type: Option<&str>,
    ) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(self.add_file_bytes(file_name, bytes, mime_type))
    }

    pub async fn add_file_path_async(self, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = file_name_of(path)?;
        let bytes = tokio::fs::read(path).await?;
        Ok(self.add_file_bytes(name, bytes, None))
    }

    pub async fn add_async_reader<R>(
        self,
        file_name: impl Into<String>,
        mut reader: R,
        mime_type: Option<&str>,
    ) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).await?;
        Ok(self.add_file_bytes(file_name, bytes, mime_type))
    }

    /// Set a request tag. A later value for the same key wins.
    pub fn add_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Seed a `context_arguments` entry of the run.
    pub fn add_context(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn document_id(mut self, document_id: impl Into<String>) -> Self {
        self.document_id = Some(document_id.into());
        self
    }

    pub fn steps<I, S>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.steps = Some(steps.into_iter().map(Into::into).collect());
        self
    }

    /// Validate and freeze the request.
    ///
    /// # Errors
    ///
    /// [`PipelineError::Validation`] when no file was added, a file name is
    /// blank, the explicit document id is blank, the step override is
    /// empty, or a context key uses a prefix reserved for artifact data
    /// (such as `chunk_text_`).
    pub fn build(self) -> Result<UploadRequest> {
        if self.files.is_empty() {
            return Err(PipelineError::validation(
                "an upload request needs at least one file",
            ));
        }
        if self.files.iter().any(|f| f.file_name.trim().is_empty()) {
            return Err(PipelineError::validation("file names must not be empty"));
        }
        if matches!(&self.document_id, Some(id) if id.trim().is_empty()) {
            return Err(PipelineError::validation("document id must not be empty"));
        }
        if matches!(&self.steps, Some(steps) if steps.is_empty()) {
            return Err(PipelineError::validation("step override must not be empty"));
        }
        if let Some(key) = self
            .context
            .keys()
            .find(|k| keys::referenced_file_id(k).is_some())
        {
            return Err(PipelineError::validation(format!(
                "context key '{}' uses a reserved artifact prefix",
                key
            )));
        }

        let documents = self
            .files
            .iter()
            .map(|f| Document {
                file_name: f.file_name.clone(),
                content: f.bytes.clone(),
                size: f.bytes.len() as u64,
                mime_type: f.mime_type_or_default().to_string(),
                tags: self.tags.clone(),
            })
            .collect();

        Ok(UploadRequest {
            files: self.files,
            documents,
            tags: self.tags,
            context: self.context,
            document_id: self.document_id,
            steps: self.steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};

    #[test]
    fn test_empty_builder_is_validation_error() {
        let err = UploadRequest::builder().build().unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn test_files_keep_insertion_order() {
        let request = UploadRequest::builder()
            .add_file_bytes("b.txt", b"b".to_vec(), None)
            .add_file_bytes("a.txt", b"a".to_vec(), None)
            .add_file_bytes("c.bin", b"c".to_vec(), Some("application/pdf"))
            .build()
            .unwrap();
        let names: Vec<_> = request.files().iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["b.txt", "a.txt", "c.bin"]);
        assert_eq!(request.files()[2].mime_type.as_deref(), Some("application/pdf"));
        assert_eq!(request.documents().len(), 3);
        assert_eq!(request.documents()[0].size, 1);
    }

    #[test]
    fn test_mime_inference() {
        assert_eq!(infer_mime_type("a.txt"), "text/plain");
        assert_eq!(infer_mime_type("report.pdf"), "application/pdf");
        assert_eq!(infer_mime_type("no_extension"), MIME_OCTET_STREAM);
    }

    #[test]
    fn test_later_tag_wins() {
        let request = UploadRequest::builder()
            .add_file_bytes("a.txt", vec![], None)
            .add_tag("k", "1")
            .add_tag("k", "2")
            .build()
            .unwrap();
        assert_eq!(request.tags()["k"], "2");
        assert_eq!(request.documents()[0].tags["k"], "2");
    }

    #[test]
    fn test_overrides_are_validated() {
        let err = UploadRequest::builder()
            .add_file_bytes("a.txt", vec![], None)
            .document_id("  ")
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));

        let err = UploadRequest::builder()
            .add_file_bytes("a.txt", vec![], None)
            .steps(Vec::<String>::new())
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
    }

    #[test]
    fn test_reserved_context_keys_rejected() {
        let err = UploadRequest::builder()
            .add_file_bytes("a.txt", b"x".to_vec(), None)
            .add_context("chunk_text_unknown", "injected")
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(ref m) if m.contains("chunk_text_unknown")));

        let err = UploadRequest::builder()
            .add_file_bytes("a.txt", b"x".to_vec(), None)
            .add_context("embedding_abc", "v")
            .build()
            .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));

        let request = UploadRequest::builder()
            .add_file_bytes("a.txt", b"x".to_vec(), None)
            .add_context("chunking_hint", "dense")
            .build()
            .unwrap();
        assert!(request.context().contains_key("chunking_hint"));
    }

    #[test]
    fn test_add_reader_and_path() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"from disk").unwrap();

        let request = UploadRequest::builder()
            .add_reader("r.md", Cursor::new(b"from reader".to_vec()), None)
            .unwrap()
            .add_file_path(tmp.path())
            .unwrap()
            .add_context("source", "test")
            .build()
            .unwrap();
        assert_eq!(request.files()[0].bytes, b"from reader");
        assert_eq!(request.files()[1].bytes, b"from disk");
        assert_eq!(request.context()["source"].as_text(), Some("test"));
    }

    #[test]
    fn test_missing_path_is_io_error() {
        let err = UploadRequest::builder()
            .add_file_path("/nonexistent/memflow/file.txt")
            .unwrap_err();
        assert!(matches!(err, PipelineError::Io(_)));
    }

    #[tokio::test]
    async fn test_async_sources() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.txt");
        tokio::fs::write(&path, b"async disk").await.unwrap();

        let request = UploadRequest::builder()
            .add_file_path_async(&path)
            .await
            .unwrap()
            .add_async_reader("stream.json", &b"{}"[..], None)
            .await
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(request.files()[0].file_name, "doc.txt");
        assert_eq!(request.files()[1].mime_type.as_deref(), Some("application/json"));
    }
}
