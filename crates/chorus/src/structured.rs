//! Structured generation: ask for a schema, parse it, degrade gracefully.

use choir_core::message::Message;
use choir_core::provider::{Provider, ProviderRequest, ResponseFormat};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::error::StageError;

/// Model parameters shared by every stage call.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o-2024-08-06".into(),
            temperature: 0.7,
            max_tokens: Some(4000),
        }
    }
}

/// The outcome of a successful generation call.
#[derive(Debug, Clone, PartialEq)]
pub enum Structured<T> {
    /// The content matched the requested schema.
    Parsed(T),
    /// The content was non-empty but did not match; `reason` says why.
    Raw { text: String, reason: String },
}

/// Call the provider with a schema hint and parse the reply as `T`.
///
/// - provider failure → `ServiceUnavailable`
/// - empty content → `MalformedResponse`
/// - unparsable content → `Structured::Raw`
pub async fn generate_structured<T: DeserializeOwned>(
    provider: &dyn Provider,
    settings: &GenerationSettings,
    messages: Vec<Message>,
    format: ResponseFormat,
) -> Result<Structured<T>, StageError> {
    let schema_name = format.name.clone();
    let request = ProviderRequest {
        model: settings.model.clone(),
        messages,
        temperature: settings.temperature,
        max_tokens: settings.max_tokens,
        response_format: Some(format),
        stop: vec![],
    };

    let response = provider.complete(request).await.map_err(|e| {
        warn!(schema = %schema_name, error = %e, "Generation call failed");
        StageError::from(e)
    })?;

    let content = response.message.content;
    let body = strip_code_fences(&content);
    if body.is_empty() {
        return Err(StageError::MalformedResponse(format!(
            "empty response for {schema_name}"
        )));
    }

    match serde_json::from_str::<T>(body) {
        Ok(parsed) => {
            debug!(schema = %schema_name, model = %response.model, "Structured response parsed");
            Ok(Structured::Parsed(parsed))
        }
        Err(e) => {
            warn!(schema = %schema_name, error = %e, "Response did not match schema, using raw text");
            Ok(Structured::Raw {
                text: body.to_string(),
                reason: format!("{schema_name}: {e}"),
            })
        }
    }
}

/// Remove a surrounding Markdown code fence (```json ... ```), if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(inner) = rest.strip_suffix("```") else {
        return trimmed;
    };
    // drop the info string ("json") on the opening line
    match inner.find('\n') {
        Some(newline) => inner[newline + 1..].trim(),
        None => inner.trim(),
    }
}
