//! Embedding service client.
//!
//! Turns a search query into a dense vector via the external embeddings
//! endpoint. Any failure here is fatal for the request: retrieval must not
//! silently degrade to "no context".

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use canon_core::config::EmbeddingConfig;
use canon_core::error::{CanonError, Result};

/// Trait for query embedding generation.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding vector for the given query text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// HTTP client for the external embedding service.
pub struct HttpEmbedder {
    client: reqwest::Client,
    config: EmbeddingConfig,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    input_type: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl HttpEmbedder {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CanonError::Embedding(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: vec![text],
            input_type: "query",
        };

        let response = self
            .client
            .post(&self.config.base_url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| CanonError::Embedding(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CanonError::Embedding(format!(
                "Embedding service error {}: {}",
                status, body
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| CanonError::Embedding(format!("Failed to parse response: {}", e)))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| CanonError::Embedding("Empty embedding response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_config(base_url: String) -> EmbeddingConfig {
        EmbeddingConfig {
            base_url,
            api_key: "test-key".to_string(),
            model: "voyage-3-lite".to_string(),
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn test_embed_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "voyage-3-lite",
                "input": ["whitewater rivers"],
                "input_type": "query",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "data": [{"embedding": [0.1, 0.2, 0.3]}]
            })))
            .mount(&server)
            .await;

        let embedder =
            HttpEmbedder::new(make_config(format!("{}/v1/embeddings", server.uri()))).unwrap();
        let vector = embedder.embed("whitewater rivers").await.unwrap();
        assert_eq!(vector, vec![0.1, 0.2, 0.3]);
    }

    #[tokio::test]
    async fn test_embed_server_error_is_fatal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(make_config(server.uri())).unwrap();
        let err = embedder.embed("query").await.unwrap_err();
        assert!(matches!(err, CanonError::Embedding(_)));
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_embed_empty_data_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": []})),
            )
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(make_config(server.uri())).unwrap();
        let err = embedder.embed("query").await.unwrap_err();
        assert!(err.to_string().contains("Empty embedding response"));
    }

    #[tokio::test]
    async fn test_embed_malformed_body_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let embedder = HttpEmbedder::new(make_config(server.uri())).unwrap();
        let err = embedder.embed("query").await.unwrap_err();
        assert!(matches!(err, CanonError::Embedding(_)));
    }
}
