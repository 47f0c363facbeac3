//! Embedding generator trait and the deterministic hash embedder.
//!
//! Defines the [`EmbeddingGenerator`] trait that all embedding backends
//! implement. Network-backed generators (OpenAI, Ollama) live in the
//! `memflow` app crate; this crate ships [`HashEmbedder`], a
//! dependency-free fallback used when no real provider is configured.

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

/// Default dimensionality of [`HashEmbedder`] vectors.
pub const DEFAULT_HASH_DIMS: usize = 384;

/// Trait for embedding generators.
///
/// Implementations must return vectors of exactly [`dims`](Self::dims)
/// elements.
#[async_trait]
pub trait EmbeddingGenerator: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts, returning vectors in input order.
    ///
    /// The default implementation calls [`embed`](Self::embed) once per
    /// text; HTTP providers override it to send one request per batch.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

/// Deterministic feature-hashing embedder.
///
/// Each lowercase alphanumeric token is hashed with SHA-256; the first
/// eight digest bytes pick a bucket and the ninth a sign. The bucket
/// counts are L2-normalised. Equal texts always produce equal vectors and
/// texts sharing vocabulary land close together, which is enough for
/// tests and offline demos. Text without tokens maps to the zero vector.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    /// Synchronous core of [`EmbeddingGenerator::embed`].
    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_DIMS)
    }
}

#[async_trait]
impl EmbeddingGenerator for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }
}
