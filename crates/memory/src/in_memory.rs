//! In-memory vector store: useful for testing and ephemeral sessions.

use async_trait::async_trait;
use choir_core::error::MemoryError;
use choir_core::memory::{RetrievedItem, StoredMessage, VectorStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::vector::vector_search;

/// A vector store that keeps every collection in a `Vec`.
///
/// Collections are created on first write; searching an unknown collection
/// yields no results.
pub struct InMemoryVectorStore {
    collections: Arc<RwLock<HashMap<String, Vec<StoredMessage>>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            collections: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of records in a collection.
    pub async fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .await
            .get(collection)
            .map_or(0, Vec::len)
    }

    /// Snapshot of a collection's records.
    pub async fn records(&self, collection: &str) -> Vec<StoredMessage> {
        self.collections
            .read()
            .await
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedItem>, MemoryError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .map(|records| vector_search(records, query_vector, limit))
            .unwrap_or_default())
    }

    async fn upsert(&self, collection: &str, message: StoredMessage) -> Result<(), MemoryError> {
        let mut collections = self.collections.write().await;
        let records = collections.entry(collection.to_string()).or_default();
        records.retain(|r| r.id != message.id);
        records.push(message);
        Ok(())
    }
}
