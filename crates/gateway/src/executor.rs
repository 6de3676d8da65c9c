//! Effect execution: the side effects the cycle only describes.
//!
//! Client-facing effects are forwarded by the handlers as-is. The one effect
//! with a storage consequence, `persist_message`, is executed here: the
//! content is embedded and upserted in a background task.

use std::sync::Arc;

use choir_chorus::{Effect, EmbeddingClient, Stage};
use choir_core::error::MemoryError;
use choir_core::memory::{StoredMessage, VectorStore};
use choir_core::message::Role;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct EffectExecutor {
    embeddings: EmbeddingClient,
    store: Arc<dyn VectorStore>,
    collection: String,
}

impl EffectExecutor {
    pub fn new(
        embeddings: EmbeddingClient,
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            embeddings,
            store,
            collection: collection.into(),
        }
    }

    /// Execute `effect` if it has a server-side consequence.
    ///
    /// Persistence is fire-and-forget; the handle is returned so callers
    /// (and tests) may await it.
    pub fn execute(&self, effect: &Effect) -> Option<JoinHandle<()>> {
        let Effect::PersistMessage {
            thread_id,
            role,
            content,
            step,
        } = effect
        else {
            return None;
        };

        let executor = self.clone();
        let (thread_id, role, content, step) = (thread_id.clone(), *role, content.clone(), *step);
        Some(tokio::spawn(async move {
            if let Err(e) = executor.persist(&thread_id, role, &content, step).await {
                warn!(thread_id = %thread_id, error = %e, "Failed to persist message");
            }
        }))
    }

    /// Execute every effect in order, returning the spawned tasks.
    pub fn execute_all(&self, effects: &[Effect]) -> Vec<JoinHandle<()>> {
        effects.iter().filter_map(|e| self.execute(e)).collect()
    }

    /// Embed `content` and store it as a conversation record.
    pub async fn persist(
        &self,
        thread_id: &str,
        role: Role,
        content: &str,
        step: Stage,
    ) -> Result<(), MemoryError> {
        let embedding = self.embeddings.embed(content).await;
        if embedding.is_fallback() {
            return Err(MemoryError::Storage(
                "no usable embedding for message".into(),
            ));
        }

        let message = StoredMessage {
            id: uuid::Uuid::new_v4().to_string(),
            thread_id: thread_id.to_string(),
            role: role.as_str().to_string(),
            content: content.to_string(),
            created_at: chrono::Utc::now(),
            step: Some(step.as_str().to_string()),
            vector: embedding.vector,
        };

        self.store.upsert(&self.collection, message).await?;
        debug!(thread_id, step = %step, store = self.store.name(), "Persisted message");
        Ok(())
    }
}
