//! # Choir Core
//!
//! Domain types, service traits, and error definitions shared by every Choir
//! crate. This crate has **zero framework dependencies**: it describes the
//! collaborators the Chorus Cycle talks to, and the other crates implement
//! against it.
//!
//! ## Seams
//!
//! - [`Provider`]: text generation and embeddings (OpenAI-compatible HTTP,
//!   scripted mocks in tests)
//! - [`VectorStore`]: semantic retrieval and message persistence (Qdrant,
//!   in-memory)

pub mod error;
pub mod memory;
pub mod message;
pub mod provider;

// Re-export key types at crate root for ergonomics
pub use error::{Error, MemoryError, ProviderError, Result};
pub use memory::{RetrievedItem, StoredMessage, VectorStore};
pub use message::{Message, Role};
pub use provider::{
    EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse,
    ResponseFormat, Usage,
};
