//! Text extraction collaborators.
//!
//! Extraction turns uploaded bytes into plain UTF-8 text. Format parsing
//! is never done in-process for binary formats; it is delegated to the
//! MarkItDown conversion service over HTTP.
//!
//! - **[`PlainTextExtractor`]**: decodes `text/*`, markdown, JSON, XML and
//!   CSV payloads as UTF-8.
//! - **[`MarkItDownExtractor`]**: posts the file to `{base_url}/convert`
//!   and returns the service's markdown. [`MarkItDownExtractor::health`]
//!   probes `{base_url}/health` so a bad `service_url` shows up before a
//!   run starts.
//! - **[`RoutingExtractor`]**: plain text where possible, the service for
//!   everything else.
//!
//! Errors are classified as [`ExtractionError::Transient`] (worth a
//! retry) or [`ExtractionError::Permanent`]. Retrying is the extraction
//! handler's job, not the extractor's.

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use thiserror::Error;

use crate::config::ExtractionConfig;

/// Extraction failure.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Network or service trouble; the same request may succeed later.
    #[error("transient extraction failure: {0}")]
    Transient(String),
    /// The input cannot be converted (unsupported format, corrupt file).
    #[error("extraction failed: {0}")]
    Permanent(String),
}

impl ExtractionError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ExtractionError::Transient(_))
    }
}

/// Converts file bytes into text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(
        &self,
        bytes: &[u8],
        mime_type: &str,
        file_name: &str,
    ) -> Result<String, ExtractionError>;
}

const TEXT_MIME_TYPES: [&str; 6] = [
    "application/json",
    "application/xml",
    "application/x-yaml",
    "application/yaml",
    "application/toml",
    "application/csv",
];

/// Whether `mime_type` names a format that is already plain text.
pub fn is_text_mime(mime_type: &str) -> bool {
    let essence = mime_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    essence.starts_with("text/") || TEXT_MIME_TYPES.contains(&essence.as_str())
}

/// UTF-8 pass-through for text formats.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextExtractor;

#[async_trait]
impl TextExtractor for PlainTextExtractor {
    async fn extract_text(
        &self,
        bytes: &[u8],
        mime_type: &str,
        file_name: &str,
    ) -> Result<String, ExtractionError> {
        if !is_text_mime(mime_type) {
            return Err(ExtractionError::Permanent(format!(
                "unsupported content-type '{}' for {}",
                mime_type, file_name
            )));
        }
        let text = String::from_utf8_lossy(bytes);
        Ok(text.trim_start_matches('\u{feff}').to_string())
    }
}

/// Response body of `POST /convert`.
#[derive(Debug, Deserialize)]
struct ConvertResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Response body of `GET /health`.
#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    status: String,
}

/// Client for the MarkItDown conversion service.
///
/// Sends a multipart form with a `file` part and a `filename` field and
/// expects `{ "success": true, "markdown": "..." }`. Status mapping:
///
/// - 2xx with `success = true` → the markdown (empty when absent)
/// - 2xx with `success = false`, other 4xx → permanent
/// - 408, 429, 5xx, connection errors → transient
pub struct MarkItDownExtractor {
    client: reqwest::Client,
    base_url: String,
}

impl MarkItDownExtractor {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &ExtractionConfig) -> anyhow::Result<Option<Self>> {
        config
            .service_url
            .as_ref()
            .map(|url| Self::new(url.clone(), Duration::from_secs(config.timeout_secs)))
            .transpose()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask the service whether it is up. Succeeds only on a 2xx answer
    /// reporting `"status": "healthy"`.
    pub async fn health(&self) -> anyhow::Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("conversion service unreachable at {}", self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            bail!("conversion service health check returned {}", status);
        }
        let body: HealthResponse = response
            .json()
            .await
            .context("malformed health response from conversion service")?;
        if body.status != "healthy" {
            bail!("conversion service reports status '{}'", body.status);
        }
        Ok(())
    }
}

#[async_trait]
impl TextExtractor for MarkItDownExtractor {
    async fn extract_text(
        &self,
        bytes: &[u8],
        mime_type: &str,
        file_name: &str,
    ) -> Result<String, ExtractionError> {
        let part = Part::bytes(bytes.to_vec())
            .file_name(file_name.to_string())
            .mime_str(mime_type)
            .map_err(|e| ExtractionError::Permanent(format!("invalid content-type: {}", e)))?;
        let form = Form::new()
            .part("file", part)
            .text("filename", file_name.to_string());

        let response = self
            .client
            .post(format!("{}/convert", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                ExtractionError::Transient(format!(
                    "conversion service unreachable at {}: {}",
                    self.base_url, e
                ))
            })?;

        let status = response.status();
        if status.as_u16() == 408 || status.as_u16() == 429 || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Transient(format!(
                "conversion service error {}: {}",
                status, body
            )));
        }

        let parsed: Option<ConvertResponse> = response.json().await.ok();
        match parsed {
            Some(body) if status.is_success() && body.success => {
                Ok(body.markdown.unwrap_or_default())
            }
            Some(body) => Err(ExtractionError::Permanent(format!(
                "conversion of {} rejected ({}): {}",
                file_name,
                status,
                body.error.unwrap_or_else(|| "no error message".to_string())
            ))),
            None if status.is_success() => Err(ExtractionError::Transient(format!(
                "malformed response from conversion service for {}",
                file_name
            ))),
            None => Err(ExtractionError::Permanent(format!(
                "conversion of {} rejected ({})",
                file_name, status
            ))),
        }
    }
}

/// Plain text in-process, everything else through the service.
pub struct RoutingExtractor {
    plain: PlainTextExtractor,
    service: Option<MarkItDownExtractor>,
}

impl RoutingExtractor {
    pub fn new(service: Option<MarkItDownExtractor>) -> Self {
        Self {
            plain: PlainTextExtractor,
            service,
        }
    }

    pub fn from_config(config: &ExtractionConfig) -> anyhow::Result<Self> {
        Ok(Self::new(MarkItDownExtractor::from_config(config)?))
    }

    /// Health-check the conversion service, if one is configured.
    pub async fn check_service(&self) -> anyhow::Result<()> {
        match &self.service {
            Some(service) => service.health().await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl TextExtractor for RoutingExtractor {
    async fn extract_text(
        &self,
        bytes: &[u8],
        mime_type: &str,
        file_name: &str,
    ) -> Result<String, ExtractionError> {
        if is_text_mime(mime_type) {
            return self.plain.extract_text(bytes, mime_type, file_name).await;
        }
        match &self.service {
            Some(service) => service.extract_text(bytes, mime_type, file_name).await,
            None => Err(ExtractionError::Permanent(format!(
                "no conversion service configured for '{}' ({})",
                mime_type, file_name
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_text_mime() {
        assert!(is_text_mime("text/plain"));
        assert!(is_text_mime("text/markdown; charset=utf-8"));
        assert!(is_text_mime("application/json"));
        assert!(!is_text_mime("application/pdf"));
        assert!(!is_text_mime("application/octet-stream"));
    }

    #[tokio::test]
    async fn test_plain_text_strips_bom() {
        let out = PlainTextExtractor
            .extract_text("\u{feff}hello".as_bytes(), "text/plain", "a.txt")
            .await
            .unwrap();
        assert_eq!(out, "hello");
    }

    #[tokio::test]
    async fn test_plain_text_rejects_binary_types() {
        let err = PlainTextExtractor
            .extract_text(b"%PDF", "application/pdf", "a.pdf")
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn test_routing_without_service_is_permanent() {
        let router = RoutingExtractor::new(None);
        let text = router
            .extract_text(b"# hi", "text/markdown", "a.md")
            .await
            .unwrap();
        assert_eq!(text, "# hi");
        let err = router
            .extract_text(b"PK", "application/zip", "a.zip")
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Permanent(_)));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transient() {
        let extractor =
            MarkItDownExtractor::new("http://127.0.0.1:9/", Duration::from_millis(500)).unwrap();
        assert_eq!(extractor.base_url(), "http://127.0.0.1:9");
        let err = extractor
            .extract_text(b"%PDF", "application/pdf", "a.pdf")
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_health_of_unreachable_service_fails() {
        let extractor =
            MarkItDownExtractor::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        let err = extractor.health().await.unwrap_err();
        assert!(err.to_string().contains("unreachable at http://127.0.0.1:9"));

        let router = RoutingExtractor::new(Some(extractor));
        assert!(router.check_service().await.is_err());
    }

    #[tokio::test]
    async fn test_check_without_service_is_ok() {
        assert!(RoutingExtractor::new(None).check_service().await.is_ok());
    }

    #[test]
    fn test_from_config_without_url() {
        let config = ExtractionConfig::default();
        assert!(MarkItDownExtractor::from_config(&config).unwrap().is_none());
    }
}
