//! In-memory [`MemoryStore`] implementation for tests and demos.
//!
//! Records live in a `HashMap` of index name to insertion-ordered records
//! behind a `std::sync::RwLock`.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::MemoryRecord;

use super::MemoryStore;

/// In-memory record store.
#[derive(Default)]
pub struct InMemoryStore {
    indexes: RwLock<HashMap<String, Vec<MemoryRecord>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record in `index`, in insertion order.
    pub fn records(&self, index: &str) -> Vec<MemoryRecord> {
        self.indexes
            .read()
            .map(|map| map.get(index).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    pub fn count(&self, index: &str) -> usize {
        self.indexes
            .read()
            .map(|map| map.get(index).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .indexes
            .read()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }
}

#[async_trait]
impl MemoryStore for InMemoryStore {
    async fn upsert(&self, index: &str, records: Vec<MemoryRecord>) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut map = self
            .indexes
            .write()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))?;
        let stored = map.entry(index.to_string()).or_default();
        for record in records {
            match stored.iter_mut().find(|r| r.id == record.id) {
                Some(existing) => *existing = record,
                None => stored.push(record),
            }
        }
        Ok(())
    }
}
