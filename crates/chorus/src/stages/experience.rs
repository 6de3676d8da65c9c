//! Step 2: retrieval-augmented refinement.
//!
//! Embeds the prompt, pulls the top-K most similar stored items, numbers
//! them as sources and asks the model to synthesise. Retrieval problems never
//! stop the stage: a fallback embedding skips the search, a failing store
//! yields empty context, and out-of-order results are re-sorted.

use choir_core::memory::{RetrievedItem, is_sorted_by_similarity};
use choir_core::provider::ResponseFormat;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{StageContext, build_messages, prompts, settle};
use crate::effect::Effect;
use crate::error::StageError;
use crate::stage::Stage;
use crate::state::{StageInput, StageResult};

pub const SENTINEL: &str = "Error processing experience step";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperienceResponse {
    pub synthesis: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

pub fn response_format() -> ResponseFormat {
    ResponseFormat {
        name: "experience_response".into(),
        schema: prompts::object_schema(&[
            ("synthesis", prompts::string()),
            ("confidence", prompts::number()),
        ]),
    }
}

pub async fn run(ctx: &StageContext<'_>, input: StageInput<'_>) -> StageResult {
    let mut failures = Vec::new();
    let items = retrieve(ctx, input.prompt, &mut failures).await;

    let user_content = format!(
        "Sources:\n{}\n\nUser query: {}",
        format_sources(&items),
        input.prompt
    );
    let messages = build_messages(prompts::EXPERIENCE, &input, &user_content);
    let outcome = ctx.generate::<ExperienceResponse>(messages, response_format()).await;

    let mut result = settle(Stage::Experience, SENTINEL, outcome, |r| {
        StageResult::from_text(Stage::Experience, r.synthesis).with_confidence(r.confidence)
    });

    // retrieval effects precede whatever the generation step raised
    let mut effects: Vec<Effect> = failures
        .iter()
        .map(|e| Effect::from_error(Stage::Experience, e))
        .collect();
    effects.push(Effect::RetrievalResult {
        step: Stage::Experience,
        items: items.clone(),
    });
    effects.append(&mut result.effects);
    result.effects = effects;

    result.with_items(items)
}

/// Embed and search. Never fails; problems are pushed onto `failures`.
async fn retrieve(
    ctx: &StageContext<'_>,
    query: &str,
    failures: &mut Vec<StageError>,
) -> Vec<RetrievedItem> {
    let embedding = ctx.embeddings.embed(query).await;
    if let Some(first) = embedding.failures.first() {
        let message = if embedding.failures.len() == 1 {
            first.to_string()
        } else {
            format!(
                "{} of {} chunk embeddings failed; first: {first}",
                embedding.failures.len(),
                embedding.chunks_total
            )
        };
        failures.push(match first {
            StageError::ValidationFailure(_) => StageError::ValidationFailure(message),
            _ => StageError::ServiceUnavailable(message),
        });
    }

    if embedding.is_fallback() {
        warn!("No usable embedding, skipping retrieval");
        return Vec::new();
    }

    let limit = ctx.settings.search_limit;
    let mut items = match ctx
        .store
        .search(&ctx.settings.collection, &embedding.vector, limit)
        .await
    {
        Ok(items) => items,
        Err(e) => {
            warn!(store = ctx.store.name(), error = %e, "Retrieval failed, continuing with empty context");
            failures.push(StageError::from(e));
            return Vec::new();
        }
    };

    if !is_sorted_by_similarity(&items) {
        warn!(store = ctx.store.name(), "Store returned unsorted results, re-sorting");
        items.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    }
    items.truncate(limit);

    info!(items = items.len(), "Retrieved prior context");
    debug!(top = ?items.first().map(|i| i.similarity), "Top similarity");
    items
}

/// `Source 1: ...` lines, one per item.
pub fn format_sources(items: &[RetrievedItem]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("Source {}: {}", i + 1, item.content))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::EffectKind;
    use crate::error::ErrorKind;
    use crate::stages::fixtures::{Harness, input};
    use crate::test_helpers::{Reply, StageScriptedProvider};
    use async_trait::async_trait;
    use choir_core::error::MemoryError;
    use choir_core::memory::{StoredMessage, VectorStore};

    fn stored(id: &str, content: &str, vector: Vec<f32>) -> StoredMessage {
        StoredMessage {
            id: id.into(),
            thread_id: "old-thread".into(),
            role: "assistant".into(),
            content: content.into(),
            created_at: Default::default(),
            step: Some("observation".into()),
            vector,
        }
    }

    fn item(id: &str, similarity: f32) -> RetrievedItem {
        RetrievedItem {
            id: id.into(),
            content: format!("content {id}"),
            thread_id: "t".into(),
            similarity,
            role: "user".into(),
            created_at: None,
            step: None,
        }
    }

    /// Returns fixed items in whatever order it was given.
    struct FixedStore(Vec<RetrievedItem>);

    #[async_trait]
    impl VectorStore for FixedStore {
        fn name(&self) -> &str {
            "fixed"
        }

        async fn search(
            &self,
            _collection: &str,
            _query_vector: &[f32],
            _limit: usize,
        ) -> Result<Vec<RetrievedItem>, MemoryError> {
            Ok(self.0.clone())
        }

        async fn upsert(&self, _collection: &str, _message: StoredMessage) -> Result<(), MemoryError> {
            Ok(())
        }
    }

    struct DownStore;

    #[async_trait]
    impl VectorStore for DownStore {
        fn name(&self) -> &str {
            "down"
        }

        async fn search(
            &self,
            _collection: &str,
            _query_vector: &[f32],
            _limit: usize,
        ) -> Result<Vec<RetrievedItem>, MemoryError> {
            Err(MemoryError::QueryFailed("connection refused".into()))
        }

        async fn upsert(&self, _collection: &str, _message: StoredMessage) -> Result<(), MemoryError> {
            Ok(())
        }
    }

    #[test]
    fn sources_are_numbered() {
        let text = format_sources(&[item("a", 0.9), item("b", 0.5)]);
        assert_eq!(text, "Source 1: content a\nSource 2: content b");
        assert_eq!(format_sources(&[]), "");
    }

    #[tokio::test]
    async fn retrieves_and_cites_sources() {
        let harness = Harness::new(StageScriptedProvider::new());
        harness
            .store
            .upsert("choir", stored("p1", "Earlier: 2+2 is 4", vec![1.0, 1.0, 1.0, 1.0]))
            .await
            .unwrap();

        let result = run(&harness.ctx(), input("What is 2+2?", &[])).await;

        let items = result.auxiliary_items.as_ref().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "p1");
        assert_eq!(result.effects[0].kind(), EffectKind::RetrievalResult);

        let request = harness.provider.requests().pop().unwrap();
        let user = request.messages.last().unwrap();
        assert!(user.content.starts_with("Sources:\nSource 1: Earlier: 2+2 is 4"));
        assert!(user.content.ends_with("User query: What is 2+2?"));
    }

    #[tokio::test]
    async fn unsorted_results_are_resorted_and_truncated() {
        let mut harness = Harness::new(StageScriptedProvider::new());
        harness.settings.search_limit = 2;
        let store = FixedStore(vec![item("low", 0.1), item("high", 0.9), item("mid", 0.5)]);
        let ctx = StageContext {
            store: &store,
            ..harness.ctx()
        };

        let result = run(&ctx, input("q", &[])).await;
        let ids: Vec<_> = result
            .auxiliary_items
            .unwrap()
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, ["high", "mid"]);
    }

    #[tokio::test]
    async fn wrong_embedding_width_means_empty_context() {
        let harness = Harness::new(StageScriptedProvider::new().embed_width(3));
        let result = run(&harness.ctx(), input("What is 2+2?", &[])).await;

        assert!(result.auxiliary_items.as_ref().unwrap().is_empty());
        assert_eq!(result.text, "No prior context changes the answer.");
        let error = result.last_error().unwrap();
        assert_eq!(error.kind, ErrorKind::ValidationFailure);

        let request = harness.provider.requests().pop().unwrap();
        assert!(request.messages.last().unwrap().content.contains("User query: What is 2+2?"));
    }

    #[tokio::test]
    async fn store_failure_is_tolerated() {
        let harness = Harness::new(StageScriptedProvider::new());
        let ctx = StageContext {
            store: &DownStore,
            ..harness.ctx()
        };
        let result = run(&ctx, input("q", &[])).await;

        assert!(result.auxiliary_items.unwrap().is_empty());
        assert_eq!(result.effects[0].kind(), EffectKind::Error);
        assert_eq!(result.effects[1].kind(), EffectKind::RetrievalResult);
    }

    #[tokio::test]
    async fn generation_failure_keeps_items() {
        let harness = Harness::new(
            StageScriptedProvider::new().script("experience_response", vec![Reply::Fail]),
        );
        let store = FixedStore(vec![item("a", 0.8)]);
        let ctx = StageContext {
            store: &store,
            ..harness.ctx()
        };
        let result = run(&ctx, input("q", &[])).await;

        assert_eq!(result.text, SENTINEL);
        assert_eq!(result.auxiliary_items.unwrap().len(), 1);
    }
}
