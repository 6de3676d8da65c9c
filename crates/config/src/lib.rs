//! Configuration loading, validation, and management for Choir.
//!
//! Loads configuration from `~/.choir/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.choir/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the generation / embedding endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Provider name (used in logs and for well-known base URLs)
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Override for the provider base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Model used by every cycle stage
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Model used for query and message embeddings
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per stage response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Cycle behaviour
    #[serde(default)]
    pub chorus: ChorusConfig,

    /// Embedding chunking and width
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Retrieval backend
    #[serde(default)]
    pub vector_store: VectorStoreConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_chat_model() -> String {
    "gpt-4o-2024-08-06".into()
}
fn default_embedding_model() -> String {
    "text-embedding-ada-002".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4000
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider", &self.provider)
            .field("api_url", &self.api_url)
            .field("chat_model", &self.chat_model)
            .field("embedding_model", &self.embedding_model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("chorus", &self.chorus)
            .field("embedding", &self.embedding)
            .field("vector_store", &self.vector_store)
            .field("gateway", &self.gateway)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChorusConfig {
    /// Maximum Action→Update passes before Yield is forced
    #[serde(default = "default_max_loops")]
    pub max_loops: u32,

    /// Top-K for the Experience stage
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
}

fn default_max_loops() -> u32 {
    5
}
fn default_search_limit() -> usize {
    80
}

impl Default for ChorusConfig {
    fn default() -> Self {
        Self {
            max_loops: default_max_loops(),
            search_limit: default_search_limit(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Declared vector width; responses of any other length are rejected
    #[serde(default = "default_vector_size")]
    pub vector_size: usize,

    /// Characters per chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters shared by consecutive chunks
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_vector_size() -> usize {
    1536
}
fn default_chunk_size() -> usize {
    4000
}
fn default_chunk_overlap() -> usize {
    200
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            vector_size: default_vector_size(),
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    /// "qdrant" or "memory"
    #[serde(default = "default_vector_backend")]
    pub backend: String,

    #[serde(default = "default_vector_url")]
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Collection holding conversation messages
    #[serde(default = "default_messages_collection")]
    pub messages_collection: String,
}

fn default_vector_backend() -> String {
    "qdrant".into()
}
fn default_vector_url() -> String {
    "http://localhost:6333".into()
}
fn default_messages_collection() -> String {
    "choir".into()
}

impl Default for VectorStoreConfig {
    fn default() -> Self {
        Self {
            backend: default_vector_backend(),
            url: default_vector_url(),
            api_key: None,
            messages_collection: default_messages_collection(),
        }
    }
}

impl std::fmt::Debug for VectorStoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorStoreConfig")
            .field("backend", &self.backend)
            .field("url", &self.url)
            .field("api_key", &redact(&self.api_key))
            .field("messages_collection", &self.messages_collection)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// CORS origins allowed to open the WebSocket
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_allowed_origins() -> Vec<String> {
    vec!["http://localhost:3000".into()]
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.choir/config.toml).
    ///
    /// Environment variables take precedence over the file:
    /// - `CHOIR_API_KEY`, then `OPENAI_API_KEY` (only if no key in the file)
    /// - `CHOIR_API_URL`, `CHOIR_CHAT_MODEL`
    /// - `QDRANT_URL`, `QDRANT_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.api_key.is_none() {
            self.api_key = lookup("CHOIR_API_KEY").or_else(|| lookup("OPENAI_API_KEY"));
        }
        if let Some(url) = lookup("CHOIR_API_URL") {
            self.api_url = Some(url);
        }
        if let Some(model) = lookup("CHOIR_CHAT_MODEL") {
            self.chat_model = model;
        }
        if let Some(url) = lookup("QDRANT_URL") {
            self.vector_store.url = url;
        }
        if let Some(key) = lookup("QDRANT_API_KEY") {
            self.vector_store.api_key = Some(key);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".choir")
    }

    /// Validate the configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.temperature < 0.0 || self.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.chorus.max_loops == 0 {
            return Err(ConfigError::ValidationError(
                "chorus.max_loops must be at least 1".into(),
            ));
        }

        if self.embedding.vector_size == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.vector_size must be > 0".into(),
            ));
        }

        if self.embedding.chunk_size == 0 || self.embedding.chunk_overlap >= self.embedding.chunk_size {
            return Err(ConfigError::ValidationError(
                "embedding.chunk_overlap must be smaller than a non-zero chunk_size".into(),
            ));
        }

        if !matches!(self.vector_store.backend.as_str(), "qdrant" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "unknown vector_store.backend '{}' (expected \"qdrant\" or \"memory\")",
                self.vector_store.backend
            )));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for the `config` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: default_provider(),
            api_url: None,
            chat_model: default_chat_model(),
            embedding_model: default_embedding_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            chorus: ChorusConfig::default(),
            embedding: EmbeddingConfig::default(),
            vector_store: VectorStoreConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chorus.search_limit, 80);
        assert_eq!(config.embedding.vector_size, 1536);
        assert_eq!(config.vector_store.messages_collection, "choir");
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.chat_model, config.chat_model);
        assert_eq!(parsed.gateway.port, config.gateway.port);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_max_loops_rejected() {
        let mut config = AppConfig::default();
        config.chorus.max_loops = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_loops"));
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk() {
        let mut config = AppConfig::default();
        config.embedding.chunk_overlap = config.embedding.chunk_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_backend_rejected() {
        let mut config = AppConfig::default();
        config.vector_store.backend = "sqlite".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.provider, "openai");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
chat_model = "gpt-4o-mini"

[chorus]
max_loops = 2

[vector_store]
backend = "memory"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.chat_model, "gpt-4o-mini");
        assert_eq!(config.chorus.max_loops, 2);
        assert_eq!(config.chorus.search_limit, 80);
        assert_eq!(config.vector_store.backend, "memory");
        assert_eq!(config.embedding.chunk_overlap, 200);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "chat_model = [unterminated").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_apply() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-env"),
            ("QDRANT_URL", "http://qdrant:6333"),
            ("CHOIR_CHAT_MODEL", "gpt-4o-mini"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.vector_store.url, "http://qdrant:6333");
        assert_eq!(config.chat_model, "gpt-4o-mini");
    }

    #[test]
    fn file_api_key_wins_over_env() {
        let mut config = AppConfig {
            api_key: Some("sk-file".into()),
            ..AppConfig::default()
        };
        config.apply_env(|k| (k == "CHOIR_API_KEY").then(|| "sk-env".to_string()));
        assert_eq!(config.api_key.as_deref(), Some("sk-file"));
    }

    #[test]
    fn debug_redacts_secrets() {
        let mut config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        config.vector_store.api_key = Some("qdrant-secret".into());
        let dbg = format!("{config:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(!dbg.contains("qdrant-secret"));
        assert!(dbg.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("gpt-4o-2024-08-06"));
        assert!(toml_str.contains("search_limit = 80"));
    }
}
