//! Vector similarity utilities.
//!
//! Pure-Rust cosine similarity and brute-force ranking, used by the
//! in-memory store.

use choir_core::memory::{RetrievedItem, StoredMessage};

/// Compute cosine similarity between two vectors.
///
/// Returns a value in [-1, 1] where 1 = identical, 0 = orthogonal, -1 = opposite.
/// Returns 0.0 if either vector is zero-length or empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-10 {
        return 0.0;
    }

    (dot / denom) as f32
}

/// Rank stored messages by cosine similarity to a query embedding.
///
/// Returns items sorted by descending similarity. Records whose vector width
/// differs from the query are skipped.
pub fn vector_search(
    records: &[StoredMessage],
    query_embedding: &[f32],
    limit: usize,
) -> Vec<RetrievedItem> {
    let mut scored: Vec<RetrievedItem> = records
        .iter()
        .filter(|r| r.vector.len() == query_embedding.len())
        .map(|r| RetrievedItem {
            id: r.id.clone(),
            content: r.content.clone(),
            thread_id: r.thread_id.clone(),
            similarity: cosine_similarity(&r.vector, query_embedding),
            role: r.role.clone(),
            created_at: Some(r.created_at),
            step: r.step.clone(),
        })
        .collect();

    scored.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    scored.truncate(limit);
    scored
}
