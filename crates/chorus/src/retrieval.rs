//! Embedding glue for the Experience stage.
//!
//! Long text is split into overlapping character windows, each window is
//! embedded concurrently, and the surviving vectors are averaged into one.
//! A chunk that fails or comes back with the wrong width is excluded from the
//! mean. When nothing survives the result is an all-zero fallback vector.

use std::sync::Arc;

use choir_core::provider::{EmbeddingRequest, Provider};
use futures::future::join_all;
use tracing::{debug, warn};

use crate::error::StageError;

/// The averaged embedding of a piece of text.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub chunks_total: usize,
    pub chunks_used: usize,
    /// Why each excluded chunk was dropped.
    pub failures: Vec<StageError>,
}

impl Embedding {
    /// True when no chunk succeeded and `vector` is all zeros.
    pub fn is_fallback(&self) -> bool {
        self.chunks_used == 0
    }
}

/// Chunking embedder over a [`Provider`].
#[derive(Clone)]
pub struct EmbeddingClient {
    provider: Arc<dyn Provider>,
    model: String,
    width: usize,
    chunk_size: usize,
    overlap: usize,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>, width: usize) -> Self {
        Self {
            provider,
            model: model.into(),
            width,
            chunk_size: 4000,
            overlap: 200,
        }
    }

    pub fn from_config(provider: Arc<dyn Provider>, config: &choir_config::AppConfig) -> Self {
        Self::new(provider, &config.embedding_model, config.embedding.vector_size)
            .with_chunking(config.embedding.chunk_size, config.embedding.chunk_overlap)
    }

    /// Set the window size and overlap, in characters.
    pub fn with_chunking(mut self, chunk_size: usize, overlap: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.overlap = overlap.min(self.chunk_size - 1);
        self
    }

    /// Declared vector width.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embed `text`, never failing: degraded outcomes show up in
    /// [`Embedding::failures`] and [`Embedding::is_fallback`].
    pub async fn embed(&self, text: &str) -> Embedding {
        let chunks = chunk_text(text, self.chunk_size, self.overlap);
        let chunks_total = chunks.len();

        let calls = chunks.into_iter().map(|chunk| self.embed_chunk(chunk));
        let outcomes = join_all(calls).await;

        let mut vectors = Vec::with_capacity(chunks_total);
        let mut failures = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(vector) => vectors.push(vector),
                Err(e) => failures.push(e),
            }
        }

        if !failures.is_empty() {
            warn!(
                failed = failures.len(),
                total = chunks_total,
                "Excluded failed chunk embeddings from the average"
            );
        }

        let chunks_used = vectors.len();
        let vector = average_vectors(&vectors, self.width).unwrap_or_else(|| vec![0.0; self.width]);
        debug!(chunks_total, chunks_used, width = self.width, "Embedded text");

        Embedding {
            vector,
            chunks_total,
            chunks_used,
            failures,
        }
    }

    async fn embed_chunk(&self, chunk: String) -> Result<Vec<f32>, StageError> {
        let response = self
            .provider
            .embed(EmbeddingRequest {
                model: self.model.clone(),
                inputs: vec![chunk],
            })
            .await?;

        let vector = response.embeddings.into_iter().next().ok_or_else(|| {
            StageError::MalformedResponse("embedding response contained no vectors".into())
        })?;

        if vector.len() != self.width {
            return Err(StageError::ValidationFailure(format!(
                "embedding width {} does not match declared width {}",
                vector.len(),
                self.width
            )));
        }
        Ok(vector)
    }
}

/// Split `text` into windows of `chunk_size` characters, each starting
/// `chunk_size - overlap` characters after the previous one.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }

    let chunk_size = chunk_size.max(1);
    let step = chunk_size.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + chunk_size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Elementwise arithmetic mean. `None` when there is nothing to average or a
/// vector's width differs from `width`.
pub fn average_vectors(vectors: &[Vec<f32>], width: usize) -> Option<Vec<f32>> {
    if vectors.is_empty() || vectors.iter().any(|v| v.len() != width) {
        return None;
    }

    let mut sum = vec![0.0f64; width];
    for vector in vectors {
        for (acc, x) in sum.iter_mut().zip(vector) {
            *acc += f64::from(*x);
        }
    }
    let n = vectors.len() as f64;
    Some(sum.into_iter().map(|s| (s / n) as f32).collect())
}
