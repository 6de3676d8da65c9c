//! Step 1: act first, with no retrieved context.

use choir_core::provider::ResponseFormat;
use serde::{Deserialize, Serialize};

use super::{StageContext, build_messages, prompts, settle};
use crate::stage::Stage;
use crate::state::{StageInput, StageResult};

pub const SENTINEL: &str = "Error generating initial response";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    #[serde(default)]
    pub initial_thoughts: String,
    pub proposed_response: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

pub fn response_format() -> ResponseFormat {
    ResponseFormat {
        name: "action_response".into(),
        schema: prompts::object_schema(&[
            ("initial_thoughts", prompts::string()),
            ("proposed_response", prompts::string()),
            ("confidence", prompts::number()),
        ]),
    }
}

pub async fn run(ctx: &StageContext<'_>, input: StageInput<'_>) -> StageResult {
    let messages = build_messages(prompts::ACTION, &input, input.prompt);
    let outcome = ctx.generate::<ActionResponse>(messages, response_format()).await;

    settle(Stage::Action, SENTINEL, outcome, |r| {
        StageResult::from_text(Stage::Action, r.proposed_response).with_confidence(r.confidence)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::fixtures::{Harness, input};
    use crate::test_helpers::{Reply, StageScriptedProvider};

    #[tokio::test]
    async fn returns_proposed_response() {
        let harness = Harness::new(StageScriptedProvider::new());
        let result = run(&harness.ctx(), input("What is 2+2?", &[])).await;
        assert_eq!(result.text, "2 + 2 = 4");
        assert_eq!(result.content, serde_json::json!("2 + 2 = 4"));
        assert_eq!(result.confidence, Some(0.9));
        assert!(result.loop_decision.is_none());
    }

    #[tokio::test]
    async fn confidence_is_not_clamped() {
        let harness = Harness::new(StageScriptedProvider::new().script(
            "action_response",
            vec![Reply::Json(serde_json::json!({
                "initial_thoughts": "",
                "proposed_response": "sure",
                "confidence": 1.7
            }))],
        ));
        let result = run(&harness.ctx(), input("q", &[])).await;
        assert_eq!(result.confidence, Some(1.7));
    }

    #[tokio::test]
    async fn fenced_json_is_accepted() {
        let harness = Harness::new(StageScriptedProvider::new().script(
            "action_response",
            vec![Reply::Text(
                "```json\n{\"initial_thoughts\":\"t\",\"proposed_response\":\"fenced\",\"confidence\":0.5}\n```"
                    .into(),
            )],
        ));
        let result = run(&harness.ctx(), input("q", &[])).await;
        assert_eq!(result.text, "fenced");
        assert!(!result.is_degraded());
    }
}
