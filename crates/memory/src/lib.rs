//! Vector store implementations for Choir.

pub mod in_memory;
pub mod qdrant;
pub mod vector;

pub use in_memory::InMemoryVectorStore;
pub use qdrant::QdrantStore;
pub use vector::{cosine_similarity, vector_search};

use choir_config::AppConfig;
use choir_core::memory::VectorStore;
use std::sync::Arc;

/// Build the vector store selected by `vector_store.backend`.
pub fn build_from_config(config: &AppConfig) -> Arc<dyn VectorStore> {
    match config.vector_store.backend.as_str() {
        "memory" => Arc::new(InMemoryVectorStore::new()),
        _ => Arc::new(QdrantStore::new(
            &config.vector_store.url,
            config.vector_store.api_key.clone(),
            config.embedding.vector_size,
        )),
    }
}
