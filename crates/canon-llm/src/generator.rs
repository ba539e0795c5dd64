//! Generation service client.
//!
//! Speaks the messages wire format in two modes: a non-streaming `complete`
//! call (used by the follow-up query rewriter) and a streaming call whose
//! SSE-framed body is re-framed into text fragments by [`crate::sse`].

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use canon_core::config::GenerationConfig;
use canon_core::error::{CanonError, Result};

use crate::sse::SseDecoder;

/// One chat-style turn sent to the generation service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

/// A fully assembled generation request: system prompt plus conversation.
///
/// Model name and wire headers come from configuration; callers only decide
/// the content and the sampling parameters.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// A pull-based stream of generated text fragments.
///
/// `None` signals normal upstream completion. An `Err` item signals a
/// mid-stream failure; no further items should be requested after one.
#[async_trait]
pub trait TokenStream: Send + std::fmt::Debug {
    async fn next_fragment(&mut self) -> Option<Result<String>>;
}

/// Trait for the generation service.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Run a request to completion and return the full answer text.
    async fn complete(&self, request: &GenerationRequest) -> Result<String>;

    /// Open a streaming request. Fails if the upstream call cannot be
    /// established; after success all failures surface through the stream.
    async fn stream(&self, request: &GenerationRequest) -> Result<Box<dyn TokenStream>>;
}

/// HTTP client for the external generation service.
pub struct HttpGenerator {
    client: reqwest::Client,
    config: GenerationConfig,
}

#[derive(Deserialize)]
struct CompletionResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

impl HttpGenerator {
    pub fn new(config: GenerationConfig) -> Result<Self> {
        // Only a connect timeout here: a whole-request timeout would cut off
        // long generations mid-stream. Non-streaming calls add a per-request
        // timeout below.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| CanonError::Generation(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn request_body(&self, request: &GenerationRequest, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": self.config.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": stream,
            "system": request.system,
            "messages": request.messages,
        })
    }

    fn post(&self, request: &GenerationRequest, stream: bool) -> reqwest::RequestBuilder {
        self.client
            .post(&self.config.base_url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", &self.config.api_version)
            .json(&self.request_body(request, stream))
    }
}

#[async_trait]
impl Generator for HttpGenerator {
    async fn complete(&self, request: &GenerationRequest) -> Result<String> {
        let response = self
            .post(request, false)
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .send()
            .await
            .map_err(|e| CanonError::Generation(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CanonError::Generation(format!(
                "Generation service error {}: {}",
                status, body
            )));
        }

        let parsed: CompletionResponse = response
            .json()
            .await
            .map_err(|e| CanonError::Generation(format!("Failed to parse response: {}", e)))?;

        parsed
            .content
            .into_iter()
            .next()
            .map(|block| block.text)
            .ok_or_else(|| CanonError::Generation("Empty completion response".to_string()))
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<Box<dyn TokenStream>> {
        let response = self
            .post(request, true)
            .send()
            .await
            .map_err(|e| CanonError::Generation(format!("Request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CanonError::Generation(format!(
                "Generation service error {}: {}",
                status, body
            )));
        }

        Ok(Box::new(HttpTokenStream {
            response,
            decoder: SseDecoder::new(),
            pending: VecDeque::new(),
        }))
    }
}

/// Token stream backed by a live upstream response body.
///
/// Dropping the stream drops the response, which releases the upstream
/// connection (the cancellation path on caller disconnect).
#[derive(Debug)]
struct HttpTokenStream {
    response: reqwest::Response,
    decoder: SseDecoder,
    pending: VecDeque<String>,
}

#[async_trait]
impl TokenStream for HttpTokenStream {
    async fn next_fragment(&mut self) -> Option<Result<String>> {
        loop {
            if let Some(fragment) = self.pending.pop_front() {
                return Some(Ok(fragment));
            }

            match self.response.chunk().await {
                Ok(Some(bytes)) => {
                    for fragment in self.decoder.feed(&bytes) {
                        self.pending.push_back(fragment);
                    }
                }
                Ok(None) => return None,
                Err(e) => {
                    return Some(Err(CanonError::Generation(format!(
                        "Upstream stream error: {}",
                        e
                    ))))
                }
            }
        }
    }
}
