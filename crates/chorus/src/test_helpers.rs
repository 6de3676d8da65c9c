//! Shared test doubles for the stage and cycle unit tests.

use choir_core::error::ProviderError;
use choir_core::message::Message;
use choir_core::provider::{
    EmbeddingRequest, EmbeddingResponse, Provider, ProviderRequest, ProviderResponse, Usage,
};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// One scripted completion.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(serde_json::Value),
    Text(String),
    Fail,
}

/// A mock provider that answers by schema name.
///
/// Each stage asks for a differently named `response_format`, so replies are
/// queued per name. An exhausted or missing queue falls back to a valid
/// default for the six stage schemas (Update defaults to `loop: false`).
/// Embeddings are vectors of `width` copies of the chunk's length.
pub struct StageScriptedProvider {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    requests: Mutex<Vec<ProviderRequest>>,
    embed_calls: Mutex<usize>,
    embed_width: usize,
    embed_fails: bool,
    embed_fail_marker: Option<String>,
}

impl StageScriptedProvider {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            embed_calls: Mutex::new(0),
            embed_width: 4,
            embed_fails: false,
            embed_fail_marker: None,
        }
    }

    /// Queue replies for a schema name.
    pub fn script(self, schema: &str, replies: Vec<Reply>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(schema.to_string())
            .or_default()
            .extend(replies);
        self
    }

    pub fn embed_width(mut self, width: usize) -> Self {
        self.embed_width = width;
        self
    }

    pub fn embed_failing(mut self) -> Self {
        self.embed_fails = true;
        self
    }

    /// Fail embedding for any chunk containing `marker`.
    pub fn embed_fail_on(mut self, marker: &str) -> Self {
        self.embed_fail_marker = Some(marker.to_string());
        self
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Schema names requested, in call order.
    pub fn schema_calls(&self) -> Vec<String> {
        self.requests()
            .iter()
            .filter_map(|r| r.response_format.as_ref().map(|f| f.name.clone()))
            .collect()
    }

    pub fn embed_calls(&self) -> usize {
        *self.embed_calls.lock().unwrap()
    }
}

/// A valid reply for each stage schema.
pub fn default_reply(schema: &str) -> Reply {
    let json = match schema {
        "action_response" => serde_json::json!({
            "initial_thoughts": "Simple arithmetic.",
            "proposed_response": "2 + 2 = 4",
            "confidence": 0.9
        }),
        "experience_response" => serde_json::json!({
            "synthesis": "No prior context changes the answer.",
            "confidence": 0.8
        }),
        "intention_response" => serde_json::json!({
            "explicit_intent": "Compute 2+2",
            "implicit_intent": "Confirm basic arithmetic",
            "confidence": 0.85
        }),
        "observation_response" => serde_json::json!({
            "patterns": ["arithmetic"],
            "context_analysis": "The user wants a direct numeric answer.",
            "user_state": "curious",
            "confidence": 0.8
        }),
        "update_response" => update_reply(false),
        "yield_response" => serde_json::json!({
            "final_response": "4",
            "reasoning": "2 + 2 is 4.",
            "confidence": 0.95
        }),
        other => panic!("StageScriptedProvider: no default reply for schema '{other}'"),
    };
    Reply::Json(json)
}

/// An Update reply with the given loop decision.
pub fn update_reply(loop_again: bool) -> serde_json::Value {
    serde_json::json!({
        "loop": loop_again,
        "reasoning": if loop_again { "Needs refinement" } else { "Ready to yield" },
        "confidence": 0.7,
        "key_insights": ["insight"]
    })
}

pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
    }
}

#[async_trait::async_trait]
impl Provider for StageScriptedProvider {
    fn name(&self) -> &str {
        "stage_scripted_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let schema = request
            .response_format
            .as_ref()
            .map(|f| f.name.clone())
            .unwrap_or_default();
        self.requests.lock().unwrap().push(request);

        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&schema)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| default_reply(&schema));

        match reply {
            Reply::Json(value) => Ok(make_text_response(&value.to_string())),
            Reply::Text(text) => Ok(make_text_response(&text)),
            Reply::Fail => Err(ProviderError::ApiError {
                status_code: 503,
                message: "scripted failure".into(),
            }),
        }
    }

    async fn embed(&self, request: EmbeddingRequest) -> Result<EmbeddingResponse, ProviderError> {
        *self.embed_calls.lock().unwrap() += 1;

        let failing_chunk = self
            .embed_fail_marker
            .as_deref()
            .is_some_and(|marker| request.inputs.iter().any(|i| i.contains(marker)));
        if self.embed_fails || failing_chunk {
            return Err(ProviderError::Network("scripted embedding failure".into()));
        }

        let embeddings = request
            .inputs
            .iter()
            .map(|input| vec![input.chars().count() as f32; self.embed_width])
            .collect();
        Ok(EmbeddingResponse {
            embeddings,
            model: request.model,
            usage: None,
        })
    }
}
