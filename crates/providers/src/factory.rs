//! Provider factory: builds the configured generation/embedding backend.

use crate::openai_compat::OpenAiCompatProvider;
use choir_core::provider::Provider;
use std::sync::Arc;
use tracing::info;

/// Build the provider described by the configuration.
///
/// Every supported backend speaks the OpenAI-compatible protocol; the
/// provider name only selects a default base URL.
pub fn build_from_config(config: &choir_config::AppConfig) -> Arc<dyn Provider> {
    let api_key = config.api_key.clone().unwrap_or_default();
    let base_url = config
        .api_url
        .clone()
        .unwrap_or_else(|| default_base_url(&config.provider));

    info!(provider = %config.provider, base_url = %base_url, "Building provider");

    Arc::new(OpenAiCompatProvider::new(&config.provider, base_url, api_key))
}

/// Get the default base URL for well-known providers.
pub fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openai" => "https://api.openai.com/v1".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}
