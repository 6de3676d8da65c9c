//! Step 5: the loop decision.
//!
//! Anything short of a well-formed `loop: true` is treated as `loop: false`,
//! so failures always steer toward Yield.

use choir_core::provider::ResponseFormat;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::{StageContext, build_messages, prompts};
use crate::error::StageError;
use crate::stage::Stage;
use crate::state::{StageInput, StageResult};
use crate::structured::Structured;

pub const SENTINEL: &str = "Error in update step";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateResponse {
    #[serde(rename = "loop")]
    pub loop_again: bool,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub key_insights: Vec<String>,
}

pub fn response_format() -> ResponseFormat {
    ResponseFormat {
        name: "update_response".into(),
        schema: prompts::object_schema(&[
            ("loop", prompts::boolean()),
            ("reasoning", prompts::string()),
            ("confidence", prompts::number()),
            ("key_insights", prompts::string_array()),
        ]),
    }
}

pub async fn run(ctx: &StageContext<'_>, input: StageInput<'_>) -> StageResult {
    let messages = build_messages(prompts::UPDATE, &input, input.prompt);
    let outcome = ctx.generate::<UpdateResponse>(messages, response_format()).await;

    match outcome {
        Ok(Structured::Parsed(r)) => {
            info!(
                loop_again = r.loop_again,
                iteration = input.iteration,
                "Update decision"
            );
            decision(r.loop_again, r.reasoning, r.confidence, r.key_insights)
        }
        Ok(Structured::Raw { text, reason }) => {
            decision(false, text, None, vec![]).with_error(&StageError::MalformedResponse(reason))
        }
        Err(e) => decision(false, SENTINEL.to_string(), None, vec![]).with_error(&e),
    }
}

fn decision(
    loop_again: bool,
    reasoning: String,
    confidence: Option<f32>,
    insights: Vec<String>,
) -> StageResult {
    let text = format!("loop: {loop_again}\nreasoning: {reasoning}");
    let content = serde_json::json!({
        "loop": loop_again,
        "reasoning": reasoning,
        "confidence": confidence,
        "insights": insights,
    });
    StageResult::new(Stage::Update, content, text)
        .with_confidence(confidence)
        .with_loop_decision(loop_again)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::stages::fixtures::{Harness, input};
    use crate::test_helpers::{Reply, StageScriptedProvider, update_reply};

    #[tokio::test]
    async fn loop_true_is_reported() {
        let harness = Harness::new(
            StageScriptedProvider::new()
                .script("update_response", vec![Reply::Json(update_reply(true))]),
        );
        let result = run(&harness.ctx(), input("q", &[])).await;

        assert_eq!(result.loop_decision, Some(true));
        assert_eq!(result.content["loop"], true);
        assert_eq!(result.content["insights"][0], "insight");
        assert_eq!(result.content["reasoning"], "Needs refinement");
    }

    #[tokio::test]
    async fn failure_defaults_to_termination() {
        let harness = Harness::new(
            StageScriptedProvider::new().script("update_response", vec![Reply::Fail]),
        );
        let result = run(&harness.ctx(), input("q", &[])).await;

        assert_eq!(result.loop_decision, Some(false));
        assert_eq!(result.content["loop"], false);
        assert_eq!(result.content["reasoning"], SENTINEL);
        assert_eq!(
            result.last_error().map(|e| e.kind),
            Some(ErrorKind::ServiceUnavailable)
        );
    }

    #[tokio::test]
    async fn unparsable_decision_does_not_loop() {
        let harness = Harness::new(StageScriptedProvider::new().script(
            "update_response",
            vec![Reply::Text("I think we should loop again".into())],
        ));
        let result = run(&harness.ctx(), input("q", &[])).await;

        assert_eq!(result.loop_decision, Some(false));
        assert_eq!(result.content["reasoning"], "I think we should loop again");
        assert_eq!(
            result.last_error().map(|e| e.kind),
            Some(ErrorKind::MalformedResponse)
        );
    }
}
