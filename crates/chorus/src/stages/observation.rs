//! Step 4: reflect on gaps and biases; record the analysis.
//!
//! A successful observation also emits a `persist_message` effect so the
//! caller can store the analysis as part of the conversation record.

use choir_core::message::Role;
use choir_core::provider::ResponseFormat;
use serde::{Deserialize, Serialize};

use super::{StageContext, build_messages, prompts, settle};
use crate::effect::Effect;
use crate::stage::Stage;
use crate::state::{StageInput, StageResult};

pub const SENTINEL: &str = "Error making observations";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservationResponse {
    #[serde(default)]
    pub patterns: Vec<String>,
    pub context_analysis: String,
    #[serde(default)]
    pub user_state: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

pub fn response_format() -> ResponseFormat {
    ResponseFormat {
        name: "observation_response".into(),
        schema: prompts::object_schema(&[
            ("patterns", prompts::string_array()),
            ("context_analysis", prompts::string()),
            ("user_state", prompts::string()),
            ("confidence", prompts::number()),
        ]),
    }
}

pub async fn run(ctx: &StageContext<'_>, input: StageInput<'_>) -> StageResult {
    let messages = build_messages(prompts::OBSERVATION, &input, input.prompt);
    let outcome = ctx.generate::<ObservationResponse>(messages, response_format()).await;

    settle(Stage::Observation, SENTINEL, outcome, |r| {
        let record = Effect::PersistMessage {
            thread_id: input.thread_id.to_string(),
            role: Role::Assistant,
            content: r.context_analysis.clone(),
            step: Stage::Observation,
        };
        StageResult::from_text(Stage::Observation, r.context_analysis)
            .with_confidence(r.confidence)
            .with_effect(record)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effect::EffectKind;
    use crate::stages::fixtures::{Harness, input};
    use crate::test_helpers::{Reply, StageScriptedProvider};

    #[tokio::test]
    async fn success_requests_persistence() {
        let harness = Harness::new(StageScriptedProvider::new());
        let result = run(&harness.ctx(), input("q", &[])).await;

        assert_eq!(result.text, "The user wants a direct numeric answer.");
        match &result.effects[..] {
            [Effect::PersistMessage {
                thread_id,
                role,
                content,
                step,
            }] => {
                assert_eq!(thread_id, "thread-1");
                assert_eq!(*role, Role::Assistant);
                assert_eq!(content, "The user wants a direct numeric answer.");
                assert_eq!(*step, Stage::Observation);
            }
            other => panic!("unexpected effects: {other:?}"),
        }
    }

    #[tokio::test]
    async fn failure_persists_nothing() {
        let harness = Harness::new(
            StageScriptedProvider::new().script("observation_response", vec![Reply::Fail]),
        );
        let result = run(&harness.ctx(), input("q", &[])).await;

        assert_eq!(result.text, SENTINEL);
        assert!(
            result
                .effects
                .iter()
                .all(|e| e.kind() != EffectKind::PersistMessage)
        );
    }
}
