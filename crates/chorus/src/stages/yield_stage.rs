//! Step 6: synthesise the final answer.

use choir_core::provider::ResponseFormat;
use serde::{Deserialize, Serialize};

use super::{StageContext, build_messages, prompts, settle};
use crate::stage::Stage;
use crate::state::{StageInput, StageResult};

pub const SENTINEL: &str = "Error generating final response";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YieldResponse {
    pub final_response: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

pub fn response_format() -> ResponseFormat {
    ResponseFormat {
        name: "yield_response".into(),
        schema: prompts::object_schema(&[
            ("final_response", prompts::string()),
            ("reasoning", prompts::string()),
            ("confidence", prompts::number()),
        ]),
    }
}

pub async fn run(ctx: &StageContext<'_>, input: StageInput<'_>) -> StageResult {
    let request = format!("Write a final response to the user's prompt: {}", input.prompt);
    let messages = build_messages(prompts::YIELD, &input, &request);
    let outcome = ctx.generate::<YieldResponse>(messages, response_format()).await;

    settle(Stage::Yield, SENTINEL, outcome, |r| {
        StageResult::from_text(Stage::Yield, r.final_response).with_confidence(r.confidence)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::fixtures::{Harness, input};
    use crate::test_helpers::{Reply, StageScriptedProvider};

    #[tokio::test]
    async fn returns_final_response() {
        let harness = Harness::new(StageScriptedProvider::new());
        let result = run(&harness.ctx(), input("What is 2+2?", &[])).await;
        assert_eq!(result.text, "4");
        assert_eq!(result.confidence, Some(0.95));

        let request = harness.provider.requests().pop().unwrap();
        assert!(request.messages.last().unwrap().content.ends_with("What is 2+2?"));
    }

    #[tokio::test]
    async fn failure_gives_sentinel() {
        let harness = Harness::new(
            StageScriptedProvider::new().script("yield_response", vec![Reply::Fail]),
        );
        let result = run(&harness.ctx(), input("q", &[])).await;
        assert_eq!(result.text, SENTINEL);
        assert!(result.confidence.is_none());
    }
}
