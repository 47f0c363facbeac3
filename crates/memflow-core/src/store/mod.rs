//! Storage abstraction for memflow.
//!
//! The [`MemoryStore`] trait is the only storage capability the pipeline
//! consumes: write a batch of embedded [`MemoryRecord`]s into an index.
//! Query semantics belong to the backend and are not modelled here.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::MemoryRecord;

/// Abstract record sink.
///
/// `upsert` replaces records whose `id` already exists in the index and
/// appends the rest. An empty batch is a no-op.
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Insert or replace `records` in `index`.
    async fn upsert(&self, index: &str, records: Vec<MemoryRecord>) -> Result<()>;
}
