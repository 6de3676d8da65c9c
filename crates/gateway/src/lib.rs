//! HTTP and WebSocket transport for Choir.
//!
//! A thin adapter over [`ChorusCycle`]: it accepts prompts, forwards the
//! cycle's effects to clients, and executes the effects that touch storage.
//! Thread management and authentication live elsewhere.
//!
//! Built on Axum.

pub mod api;
pub mod executor;

use std::sync::Arc;

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    response::Json,
    routing::{get, post},
};
use choir_chorus::{ChorusCycle, ChorusServices, CycleSettings, EmbeddingClient};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};

pub use executor::EffectExecutor;

/// Shared application state for the gateway.
pub struct GatewayState {
    pub cycle: Arc<ChorusCycle>,
    pub executor: EffectExecutor,
}

pub type SharedState = Arc<GatewayState>;

impl GatewayState {
    /// Wire the cycle and executor from configuration.
    pub fn from_config(config: &choir_config::AppConfig) -> Self {
        let provider = choir_providers::build_from_config(config);
        let store = choir_memory::build_from_config(config);
        let embeddings = EmbeddingClient::from_config(provider.clone(), config);

        let services = ChorusServices::new(provider, embeddings.clone(), store.clone());
        let cycle = ChorusCycle::new(services, CycleSettings::from_config(config));
        let executor =
            EffectExecutor::new(embeddings, store, &config.vector_store.messages_collection);

        Self {
            cycle: Arc::new(cycle),
            executor,
        }
    }
}

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState, allowed_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .max_age(std::time::Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(api::ws_handler))
        .route("/v1/chorus", post(api::chorus_handler))
        .with_state(state)
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Start the gateway HTTP server.
pub async fn start(config: choir_config::AppConfig) -> choir_core::Result<()> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);

    let state = Arc::new(GatewayState::from_config(&config));
    let app = build_router(state, &config.gateway.allowed_origins);

    info!(addr = %addr, "Gateway starting");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| choir_core::Error::Internal(format!("Failed to bind {addr}: {e}")))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| choir_core::Error::Internal(format!("Gateway stopped: {e}")))?;

    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use choir_memory::InMemoryVectorStore;
    use http_body_util::BodyExt;
    use test_support::MockProvider;
    use tower::ServiceExt;

    fn test_state() -> (SharedState, Arc<InMemoryVectorStore>) {
        let provider = Arc::new(MockProvider::new(4));
        let store = Arc::new(InMemoryVectorStore::new());
        let embeddings = EmbeddingClient::new(provider.clone(), "embed", 4);
        let services = ChorusServices::new(provider, embeddings.clone(), store.clone());
        let state = GatewayState {
            cycle: Arc::new(ChorusCycle::new(services, CycleSettings::default())),
            executor: EffectExecutor::new(embeddings, store.clone(), "choir"),
        };
        (Arc::new(state), store)
    }

    fn app() -> Router {
        build_router(test_state().0, &["http://localhost:3000".into()])
    }

    fn chorus_request(body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/chorus")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(req).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn chorus_returns_effects() {
        let response = app()
            .oneshot(chorus_request(
                serde_json::json!({"thread_id": "t1", "prompt": "What is 2+2?"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let effects: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        let last = effects.last().unwrap();
        assert_eq!(last["type"], "terminal_response");
        assert_eq!(last["content"], "Mock response from chorus");

        let outputs = effects.iter().filter(|e| e["type"] == "stage_output").count();
        assert_eq!(outputs, 6);
    }

    #[tokio::test]
    async fn chorus_persists_observation() {
        let (state, store) = test_state();
        let app = build_router(state, &[]);
        let response = app
            .oneshot(chorus_request(serde_json::json!({"thread_id": "t9", "prompt": "hi"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // persistence runs in the background
        for _ in 0..50 {
            if store.count("choir").await > 0 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        let records = store.records("choir").await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].thread_id, "t9");
        assert_eq!(records[0].content, "Direct arithmetic question.");
    }

    #[tokio::test]
    async fn empty_prompt_is_bad_request() {
        let response = app()
            .oneshot(chorus_request(serde_json::json!({"prompt": "  "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["kind"], "validation_failure");
    }

    #[tokio::test]
    async fn missing_prompt_is_rejected() {
        let response = app()
            .oneshot(chorus_request(serde_json::json!({"thread_id": "t1"})))
            .await
            .unwrap();
        assert!(response.status().is_client_error());
    }

    #[tokio::test]
    async fn state_from_default_config() {
        let state = GatewayState::from_config(&choir_config::AppConfig::default());
        assert_eq!(state.cycle.settings().max_loops, 5);
    }
}
