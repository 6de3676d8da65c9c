//! VectorStore trait: semantic retrieval over previously stored messages.
//!
//! The Experience stage embeds its input and asks the store for the top-K
//! most similar prior items. The transport layer also writes conversation
//! records back through the same trait. The cycle core itself only reads.

use crate::error::MemoryError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A read-only snapshot of a stored item returned by a similarity search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedItem {
    /// Point identifier in the store
    pub id: String,

    /// The stored text
    pub content: String,

    /// Thread the item originated from
    #[serde(default)]
    pub thread_id: String,

    /// Similarity to the query vector (higher is closer)
    pub similarity: f32,

    /// Role of the original author
    #[serde(default)]
    pub role: String,

    /// When the item was stored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// Cycle stage that produced the item, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

/// A message record to be written to the store together with its vector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: String,
    pub thread_id: String,
    pub role: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip)]
    pub vector: Vec<f32>,
}

/// The retrieval / persistence service.
///
/// Implementations: Qdrant (REST), in-memory (for testing).
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// The backend name (e.g., "qdrant", "in_memory").
    fn name(&self) -> &str;

    /// Return up to `limit` items ordered by descending similarity.
    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        limit: usize,
    ) -> std::result::Result<Vec<RetrievedItem>, MemoryError>;

    /// Insert or replace a message record.
    async fn upsert(
        &self,
        collection: &str,
        message: StoredMessage,
    ) -> std::result::Result<(), MemoryError>;

    /// Health check: can we reach the store?
    async fn health_check(&self) -> std::result::Result<bool, MemoryError> {
        Ok(true)
    }
}

/// Whether a result list honours the descending-similarity contract.
pub fn is_sorted_by_similarity(items: &[RetrievedItem]) -> bool {
    items.windows(2).all(|w| w[0].similarity >= w[1].similarity)
}
