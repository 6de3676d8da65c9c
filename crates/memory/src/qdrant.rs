//! Qdrant backend: talks to the Qdrant REST API over reqwest.
//!
//! Points carry the message text and its provenance in the payload
//! (`content`, `thread_id`, `role`, `created_at`, `step`). Collections are
//! created lazily on first upsert with cosine distance and the configured
//! vector width; searching a collection that does not exist yet yields no
//! results.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use choir_core::error::MemoryError;
use choir_core::memory::{RetrievedItem, StoredMessage, VectorStore};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

pub struct QdrantStore {
    base_url: String,
    api_key: Option<String>,
    vector_size: usize,
    client: reqwest::Client,
    ensured: RwLock<HashSet<String>>,
}

impl QdrantStore {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>, vector_size: usize) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            vector_size,
            client,
            ensured: RwLock::new(HashSet::new()),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.header("api-key", key),
            None => builder,
        }
    }

    /// Create the collection if it does not exist yet.
    pub async fn ensure_collection(&self, collection: &str) -> Result<(), MemoryError> {
        if self.ensured.read().await.contains(collection) {
            return Ok(());
        }

        let path = format!("/collections/{collection}");
        let response = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(|e| MemoryError::Storage(e.to_string()))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            info!(collection, size = self.vector_size, "Creating Qdrant collection");
            let body = serde_json::json!({
                "vectors": { "size": self.vector_size, "distance": "Cosine" }
            });
            let created = self
                .request(reqwest::Method::PUT, &path)
                .json(&body)
                .send()
                .await
                .map_err(|e| MemoryError::Storage(e.to_string()))?;
            if !created.status().is_success() {
                let status = created.status().as_u16();
                let text = created.text().await.unwrap_or_default();
                return Err(MemoryError::Storage(format!(
                    "create collection '{collection}' failed ({status}): {text}"
                )));
            }
        } else if !response.status().is_success() {
            return Err(MemoryError::Storage(format!(
                "collection lookup '{collection}' failed with status {}",
                response.status().as_u16()
            )));
        }

        self.ensured.write().await.insert(collection.to_string());
        Ok(())
    }
}

#[async_trait]
impl VectorStore for QdrantStore {
    fn name(&self) -> &str {
        "qdrant"
    }

    async fn search(
        &self,
        collection: &str,
        query_vector: &[f32],
        limit: usize,
    ) -> Result<Vec<RetrievedItem>, MemoryError> {
        if query_vector.len() != self.vector_size {
            return Err(MemoryError::DimensionMismatch {
                expected: self.vector_size,
                actual: query_vector.len(),
            });
        }

        debug!(collection, limit, "Qdrant search");

        let body = SearchRequest {
            vector: query_vector,
            limit,
            with_payload: true,
            with_vector: false,
        };

        let response = self
            .request(
                reqwest::Method::POST,
                &format!("/collections/{collection}/points/search"),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| MemoryError::QueryFailed(e.to_string()))?;

        // nothing has been written yet: same as an empty collection
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(collection, "Qdrant collection missing, no results");
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            warn!(status, body = %text, "Qdrant search failed");
            return Err(MemoryError::QueryFailed(format!("status {status}: {text}")));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("Failed to parse search response: {e}")))?;

        Ok(parsed.result.into_iter().map(ScoredPoint::into_item).collect())
    }

    async fn upsert(&self, collection: &str, message: StoredMessage) -> Result<(), MemoryError> {
        if message.vector.len() != self.vector_size {
            return Err(MemoryError::DimensionMismatch {
                expected: self.vector_size,
                actual: message.vector.len(),
            });
        }

        self.ensure_collection(collection).await?;

        let body = serde_json::json!({
            "points": [{
                "id": message.id,
                "vector": message.vector,
                "payload": {
                    "content": message.content,
                    "thread_id": message.thread_id,
                    "role": message.role,
                    "created_at": message.created_at.to_rfc3339(),
                    "step": message.step,
                }
            }]
        });

        let response = self
            .request(
                reqwest::Method::PUT,
                &format!("/collections/{collection}/points?wait=true"),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| MemoryError::Storage(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let text = response.text().await.unwrap_or_default();
            return Err(MemoryError::Storage(format!("upsert failed ({status}): {text}")));
        }

        Ok(())
    }

    async fn health_check(&self) -> Result<bool, MemoryError> {
        let response = self
            .request(reqwest::Method::GET, "/healthz")
            .send()
            .await
            .map_err(|e| MemoryError::Storage(e.to_string()))?;
        Ok(response.status().is_success())
    }
}

// --- Qdrant REST types (internal) ---

#[derive(Serialize)]
struct SearchRequest<'a> {
    vector: &'a [f32],
    limit: usize,
    with_payload: bool,
    with_vector: bool,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: serde_json::Value,
    score: f32,
    #[serde(default)]
    payload: PointPayload,
}

#[derive(Default, Deserialize)]
struct PointPayload {
    #[serde(default)]
    content: String,
    #[serde(default)]
    thread_id: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    step: Option<String>,
}

impl ScoredPoint {
    fn into_item(self) -> RetrievedItem {
        let id = match self.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        let created_at = self
            .payload
            .created_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc));

        RetrievedItem {
            id,
            content: self.payload.content,
            thread_id: self.payload.thread_id,
            similarity: self.score,
            role: self.payload.role,
            created_at,
            step: self.payload.step.filter(|s| !s.is_empty()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_search_response() {
        let data = r#"{
            "result": [
                {"id": "7f1c6a0e-0000-4000-8000-000000000001", "score": 0.92, "version": 3,
                 "payload": {"content": "prior answer", "thread_id": "t1", "role": "assistant",
                             "created_at": "2024-10-01T12:00:00+00:00", "step": "observation"}},
                {"id": 42, "score": 0.5, "payload": {"content": "numeric id"}}
            ],
            "status": "ok",
            "time": 0.001
        }"#;
        let parsed: SearchResponse = serde_json::from_str(data).unwrap();
        let items: Vec<_> = parsed.result.into_iter().map(ScoredPoint::into_item).collect();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].thread_id, "t1");
        assert_eq!(items[0].step.as_deref(), Some("observation"));
        assert!(items[0].created_at.is_some());
        assert_eq!(items[1].id, "42");
        assert!(items[1].created_at.is_none());
    }

    #[test]
    fn empty_api_key_is_ignored() {
        let store = QdrantStore::new("http://localhost:6333/", Some(String::new()), 4);
        assert!(store.api_key.is_none());
        assert_eq!(store.base_url, "http://localhost:6333");
    }

    /// Consume one request (headers plus `content-length` body).
    async fn read_request(socket: &mut tokio::net::TcpStream) {
        use tokio::io::AsyncReadExt;

        let mut received = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let Ok(n) = socket.read(&mut chunk).await else { return };
            if n == 0 {
                return;
            }
            received.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&received);
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|line| {
                        let (name, value) = line.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if received.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    /// Serve every request on a local port with a fixed status and body.
    async fn stub_qdrant(status: &'static str, body: &'static str) -> String {
        use tokio::io::AsyncWriteExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                read_request(&mut socket).await;
                let response = format!(
                    "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn search_missing_collection_is_empty() {
        let url = stub_qdrant(
            "404 Not Found",
            r#"{"status":{"error":"Not found: Collection `choir` doesn't exist!"},"time":0.0}"#,
        )
        .await;
        let store = QdrantStore::new(url, None, 4);

        let items = store.search("choir", &[0.1, 0.2, 0.3, 0.4], 5).await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn search_server_error_is_reported() {
        let url = stub_qdrant("500 Internal Server Error", r#"{"status":{"error":"boom"}}"#).await;
        let store = QdrantStore::new(url, None, 4);

        let err = store.search("choir", &[0.1, 0.2, 0.3, 0.4], 5).await.unwrap_err();
        assert!(matches!(err, MemoryError::QueryFailed(_)));
    }

    #[tokio::test]
    async fn search_parses_results_from_server() {
        let url = stub_qdrant(
            "200 OK",
            r#"{"result":[{"id":"a","score":0.8,"payload":{"content":"prior","thread_id":"t1"}}],"status":"ok","time":0.0}"#,
        )
        .await;
        let store = QdrantStore::new(url, None, 4);

        let items = store.search("choir", &[0.1, 0.2, 0.3, 0.4], 5).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, "prior");
        assert!((items[0].similarity - 0.8).abs() < 1e-6);
    }

    #[tokio::test]
    async fn search_rejects_wrong_width_before_network() {
        let store = QdrantStore::new("http://127.0.0.1:9", None, 4);
        let err = store.search("choir", &[1.0, 2.0], 5).await.unwrap_err();
        assert!(matches!(
            err,
            MemoryError::DimensionMismatch { expected: 4, actual: 2 }
        ));
    }
}
