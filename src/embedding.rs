//! Network-backed embedding generators.
//!
//! The [`EmbeddingGenerator`] trait and the offline [`HashEmbedder`] live
//! in `memflow_core::embedding`. This module adds the HTTP providers:
//!
//! - **[`OpenAIEmbedder`]**: calls `POST /v1/embeddings`.
//! - **[`OllamaEmbedder`]**: calls `POST /api/embed` on a local Ollama.
//!
//! # Provider Selection
//!
//! Use [`create_generator`] to instantiate the generator named by the
//! configuration:
//!
//! ```rust
//! # use memflow::config::EmbeddingConfig;
//! # use memflow::embedding::create_generator;
//! let config = EmbeddingConfig::default(); // provider = "hash"
//! let generator = create_generator(&config).unwrap();
//! assert_eq!(generator.model_name(), "hash");
//! ```
//!
//! # Retry Strategy
//!
//! Both HTTP providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//!
//! Delays are 1s, 2s, 4s, … capped at 32s, for up to `max_retries`
//! additional attempts.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use tracing::warn;

use memflow_core::embedding::{EmbeddingGenerator, HashEmbedder, DEFAULT_HASH_DIMS};

use crate::config::EmbeddingConfig;

const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";

/// Instantiate the configured embedding generator.
///
/// | `provider` | Generator |
/// |------------|-----------|
/// | `"hash"` | [`HashEmbedder`] (`dims` defaults to 384) |
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
pub fn create_generator(config: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingGenerator>> {
    match config.provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbedder::new(
            config.dims.unwrap_or(DEFAULT_HASH_DIMS),
        ))),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: '{}'", other),
    }
}

/// Shared HTTP plumbing for the remote providers.
struct HttpEmbedClient {
    client: reqwest::Client,
    provider: &'static str,
    max_retries: u32,
}

impl HttpEmbedClient {
    fn new(provider: &'static str, config: &EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            provider,
            max_retries: config.max_retries,
        })
    }

    /// POST `body` to `url` with retry/backoff and return the JSON reply.
    async fn post_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                warn!(
                    provider = self.provider,
                    attempt,
                    delay_secs = delay.as_secs(),
                    "retrying embedding request"
                );
                tokio::time::sleep(delay).await;
            }

            let mut request = self.client.post(url).json(body);
            if let Some(key) = bearer {
                request = request.header("Authorization", format!("Bearer {}", key));
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        return Ok(response.json().await?);
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err = Some(anyhow!(
                            "{} API error {}: {}",
                            self.provider,
                            status,
                            body_text
                        ));
                        continue;
                    }

                    let body_text = response.text().await.unwrap_or_default();
                    bail!("{} API error {}: {}", self.provider, status, body_text);
                }
                Err(e) => {
                    last_err = Some(anyhow!(
                        "{} connection error at {}: {}",
                        self.provider,
                        url,
                        e
                    ));
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("{} embedding failed after retries", self.provider)))
    }
}

fn required_model_and_dims(config: &EmbeddingConfig, provider: &str) -> Result<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow!("embedding.model required for {} provider", provider))?;
    let dims = config
        .dims
        .ok_or_else(|| anyhow!("embedding.dims required for {} provider", provider))?;
    Ok((model, dims))
}

fn check_dims(vectors: &[Vec<f32>], expected: usize, count: usize) -> Result<()> {
    if vectors.len() != count {
        bail!(
            "embedding response has {} vectors for {} inputs",
            vectors.len(),
            count
        );
    }
    if let Some(v) = vectors.iter().find(|v| v.len() != expected) {
        bail!(
            "embedding has {} dimensions, expected {}",
            v.len(),
            expected
        );
    }
    Ok(())
}

fn first_vector(mut vectors: Vec<Vec<f32>>) -> Result<Vec<f32>> {
    if vectors.is_empty() {
        bail!("embedding response was empty");
    }
    Ok(vectors.swap_remove(0))
}

/// Embedding generator using the OpenAI API.
///
/// Requires the `OPENAI_API_KEY` environment variable. `embedding.url`
/// overrides the base URL for OpenAI-compatible gateways.
pub struct OpenAIEmbedder {
    http: HttpEmbedClient,
    api_key: String,
    base_url: String,
    model: String,
    dims: usize,
}

impl OpenAIEmbedder {
    /// # Errors
    ///
    /// Returns an error if `model` or `dims` is not set in config,
    /// or if `OPENAI_API_KEY` is not in the environment.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = required_model_and_dims(config, "OpenAI")?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base_url = config
            .url
            .as_deref()
            .unwrap_or(OPENAI_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http: HttpEmbedClient::new("OpenAI", config)?,
            api_key,
            base_url,
            model,
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingGenerator for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        first_vector(self.embed_batch(&[text.to_string()]).await?)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = self
            .http
            .post_json(
                &format!("{}/v1/embeddings", self.base_url),
                Some(&self.api_key),
                &body,
            )
            .await?;
        let vectors = parse_openai_response(&json)?;
        check_dims(&vectors, self.dims, texts.len())?;
        Ok(vectors)
    }
}

/// Parse the OpenAI embeddings API response JSON.
///
/// Extracts the `data[].embedding` arrays, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());

    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("Invalid OpenAI response: missing embedding"))?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map_or(position, |i| i as usize);

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

/// Embedding generator using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default:
/// `http://localhost:11434`). Requires an embedding model to be pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    http: HttpEmbedClient,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = required_model_and_dims(config, "Ollama")?;
        let url = config
            .url
            .as_deref()
            .unwrap_or(OLLAMA_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http: HttpEmbedClient::new("Ollama", config)?,
            url,
            model,
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingGenerator for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        first_vector(self.embed_batch(&[text.to_string()]).await?)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = self
            .http
            .post_json(&format!("{}/api/embed", self.url), None, &body)
            .await?;
        let vectors = parse_ollama_response(&json)?;
        check_dims(&vectors, self.dims, texts.len())?;
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow!("Invalid Ollama response: missing embeddings array"))?;

    let mut result = Vec::with_capacity(embeddings.len());

    for embedding in embeddings {
        let vec: Vec<f32> = embedding
            .as_array()
            .ok_or_else(|| anyhow!("Invalid Ollama response: embedding is not an array"))?
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        result.push(vec);
    }

    Ok(result)
}
