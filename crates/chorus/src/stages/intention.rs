//! Step 3: separate explicit from implicit intent.

use choir_core::provider::ResponseFormat;
use serde::{Deserialize, Serialize};

use super::{StageContext, build_messages, prompts, settle};
use crate::stage::Stage;
use crate::state::{StageInput, StageResult};

pub const SENTINEL: &str = "Error analyzing intention";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentionResponse {
    pub explicit_intent: String,
    pub implicit_intent: String,
    #[serde(default)]
    pub confidence: Option<f32>,
}

impl IntentionResponse {
    /// Both components, as later stages see them.
    pub fn summary(&self) -> String {
        format!(
            "Explicit: {}\nImplicit: {}",
            self.explicit_intent, self.implicit_intent
        )
    }
}

pub fn response_format() -> ResponseFormat {
    ResponseFormat {
        name: "intention_response".into(),
        schema: prompts::object_schema(&[
            ("explicit_intent", prompts::string()),
            ("implicit_intent", prompts::string()),
            ("confidence", prompts::number()),
        ]),
    }
}

pub async fn run(ctx: &StageContext<'_>, input: StageInput<'_>) -> StageResult {
    let messages = build_messages(prompts::INTENTION, &input, input.prompt);
    let outcome = ctx.generate::<IntentionResponse>(messages, response_format()).await;

    settle(Stage::Intention, SENTINEL, outcome, |r| {
        StageResult::from_text(Stage::Intention, r.summary()).with_confidence(r.confidence)
    })
}
