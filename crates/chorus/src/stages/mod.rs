//! Stage executors.
//!
//! Each stage is a function of its [`StageInput`] and the injected services
//! that returns a [`StageResult`]. Stages never fail: service errors become
//! a sentinel output plus an `error` effect. Dispatch is an exhaustive match
//! over [`Stage`].

pub mod action;
pub mod experience;
pub mod intention;
pub mod observation;
pub mod prompts;
pub mod update;
pub mod yield_stage;

use choir_core::memory::VectorStore;
use choir_core::message::Message;
use choir_core::provider::{Provider, ResponseFormat};
use serde::de::DeserializeOwned;

use crate::cycle::CycleSettings;
use crate::error::StageError;
use crate::retrieval::EmbeddingClient;
use crate::stage::Stage;
use crate::state::{StageInput, StageResult};
use crate::structured::{Structured, generate_structured};

/// Services and settings a stage may use.
#[derive(Clone, Copy)]
pub struct StageContext<'a> {
    pub generator: &'a dyn Provider,
    pub embeddings: &'a EmbeddingClient,
    pub store: &'a dyn VectorStore,
    pub settings: &'a CycleSettings,
}

impl StageContext<'_> {
    pub(crate) async fn generate<T: DeserializeOwned>(
        &self,
        messages: Vec<Message>,
        format: ResponseFormat,
    ) -> Result<Structured<T>, StageError> {
        generate_structured(self.generator, &self.settings.generation, messages, format).await
    }
}

/// Run `stage` against `input`.
pub async fn execute(stage: Stage, ctx: &StageContext<'_>, input: StageInput<'_>) -> StageResult {
    match stage {
        Stage::Action => action::run(ctx, input).await,
        Stage::Experience => experience::run(ctx, input).await,
        Stage::Intention => intention::run(ctx, input).await,
        Stage::Observation => observation::run(ctx, input).await,
        Stage::Update => update::run(ctx, input).await,
        Stage::Yield => yield_stage::run(ctx, input).await,
    }
}

/// Instruction, then prior stage outputs, then the user turn.
pub fn build_messages(instruction: &str, input: &StageInput<'_>, user_content: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(input.accumulated_messages.len() + 2);
    messages.push(Message::system(instruction));
    for prior in input.accumulated_messages {
        let step = prior.metadata_str("step").unwrap_or("context");
        messages.push(Message::assistant(format!("[{step}] {}", prior.content)));
    }
    messages.push(Message::user(user_content));
    messages
}

/// Map a structured reply to a result, handling the raw-text and failure
/// paths every stage shares.
pub(crate) fn settle<T>(
    stage: Stage,
    sentinel: &str,
    outcome: Result<Structured<T>, StageError>,
    parsed: impl FnOnce(T) -> StageResult,
) -> StageResult {
    match outcome {
        Ok(Structured::Parsed(value)) => parsed(value),
        Ok(Structured::Raw { text, reason }) => {
            StageResult::from_text(stage, text).with_error(&StageError::MalformedResponse(reason))
        }
        Err(e) => StageResult::degraded(stage, sentinel, &e),
    }
}
