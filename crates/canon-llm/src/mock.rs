//! Scriptable in-process implementations of the upstream traits.
//!
//! `MockEmbedder` returns deterministic hash-derived unit vectors and records
//! every query it is asked to embed; `MockGenerator` replays a scripted
//! fragment sequence and counts calls. Downstream crates use these to drive
//! the full pipeline without a network.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use canon_core::error::{CanonError, Result};

use crate::embedder::Embedder;
use crate::generator::{GenerationRequest, Generator, TokenStream};

const MOCK_DIMENSIONS: usize = 64;

/// Deterministic embedding service for tests.
///
/// Identical inputs always produce identical vectors, so a test can seed a
/// passage with `MockEmbedder::vector_for(text)` and control exactly which
/// queries match it.
#[derive(Debug, Default)]
pub struct MockEmbedder {
    queries: Mutex<Vec<String>>,
    fail: bool,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// An embedder whose every call fails, for exercising the fatal path.
    pub fn failing() -> Self {
        Self {
            queries: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// The vector this embedder would return for `text`.
    pub fn vector_for(text: &str) -> Vec<f32> {
        let mut result = Vec::with_capacity(MOCK_DIMENSIONS);
        for i in 0..MOCK_DIMENSIONS {
            let mut hasher = DefaultHasher::new();
            text.hash(&mut hasher);
            i.hash(&mut hasher);
            let h = hasher.finish();
            let val = ((h as f64) / (u64::MAX as f64)) * 2.0 - 1.0;
            result.push(val as f32);
        }

        // L2-normalize to unit vectors so cosine scores are well-behaved.
        let norm: f32 = result.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for val in &mut result {
                *val /= norm;
            }
        }

        result
    }

    /// Every query embedded so far, in call order.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().map(|q| q.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.fail {
            return Err(CanonError::Embedding(
                "Embedding service unavailable".to_string(),
            ));
        }
        if let Ok(mut queries) = self.queries.lock() {
            queries.push(text.to_string());
        }
        Ok(Self::vector_for(text))
    }
}

/// Scriptable generation service for tests.
#[derive(Debug, Default)]
pub struct MockGenerator {
    fragments: Vec<std::result::Result<String, String>>,
    completion: Option<String>,
    fail_stream_open: bool,
    complete_calls: AtomicUsize,
    stream_calls: AtomicUsize,
    last_complete: Mutex<Option<GenerationRequest>>,
    last_stream: Mutex<Option<GenerationRequest>>,
}

impl MockGenerator {
    /// A generator that streams the given fragments, then completes.
    pub fn answering(fragments: &[&str]) -> Self {
        Self {
            fragments: fragments.iter().map(|f| Ok(f.to_string())).collect(),
            ..Self::default()
        }
    }

    /// A generator that streams the given fragment results verbatim; an Err
    /// item becomes a mid-stream failure.
    pub fn with_fragments(fragments: Vec<std::result::Result<String, String>>) -> Self {
        Self {
            fragments,
            ..Self::default()
        }
    }

    /// A generator whose streaming call cannot even be established.
    pub fn failing_to_open() -> Self {
        Self {
            fail_stream_open: true,
            ..Self::default()
        }
    }

    /// Configure the reply returned by `complete` (the rewrite call).
    /// Without one, `complete` fails, exercising the rewriter's fallback.
    pub fn with_completion(mut self, reply: &str) -> Self {
        self.completion = Some(reply.to_string());
        self
    }

    pub fn complete_calls(&self) -> usize {
        self.complete_calls.load(Ordering::SeqCst)
    }

    pub fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    /// The last request passed to `complete`, if any.
    pub fn last_complete(&self) -> Option<GenerationRequest> {
        self.last_complete.lock().ok().and_then(|r| r.clone())
    }

    /// The last request passed to `stream`, if any.
    pub fn last_stream(&self) -> Option<GenerationRequest> {
        self.last_stream.lock().ok().and_then(|r| r.clone())
    }
}

#[async_trait]
impl Generator for MockGenerator {
    async fn complete(&self, request: &GenerationRequest) -> Result<String> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_complete.lock() {
            *last = Some(request.clone());
        }
        self.completion
            .clone()
            .ok_or_else(|| CanonError::Generation("Completion not configured".to_string()))
    }

    async fn stream(&self, request: &GenerationRequest) -> Result<Box<dyn TokenStream>> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last_stream.lock() {
            *last = Some(request.clone());
        }
        if self.fail_stream_open {
            return Err(CanonError::Generation(
                "Generation service unavailable".to_string(),
            ));
        }
        Ok(Box::new(MockTokenStream {
            queue: self.fragments.clone().into(),
        }))
    }
}

/// Token stream replaying a scripted fragment sequence.
#[derive(Debug)]
pub struct MockTokenStream {
    queue: VecDeque<std::result::Result<String, String>>,
}

#[async_trait]
impl TokenStream for MockTokenStream {
    async fn next_fragment(&mut self) -> Option<Result<String>> {
        self.queue
            .pop_front()
            .map(|item| item.map_err(CanonError::Generation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::ChatMessage;

    fn make_request() -> GenerationRequest {
        GenerationRequest {
            system: "system".to_string(),
            messages: vec![ChatMessage::new("user", "hi")],
            max_tokens: 10,
            temperature: 0.0,
        }
    }

    #[test]
    fn test_vector_deterministic() {
        assert_eq!(
            MockEmbedder::vector_for("same"),
            MockEmbedder::vector_for("same")
        );
        assert_ne!(
            MockEmbedder::vector_for("one"),
            MockEmbedder::vector_for("two")
        );
    }

    #[test]
    fn test_vector_unit_norm() {
        let v = MockEmbedder::vector_for("anything");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_mock_embedder_records_queries() {
        let embedder = MockEmbedder::new();
        embedder.embed("first").await.unwrap();
        embedder.embed("second").await.unwrap();
        assert_eq!(embedder.queries(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_mock_embedder_failing() {
        let embedder = MockEmbedder::failing();
        let err = embedder.embed("query").await.unwrap_err();
        assert!(matches!(err, CanonError::Embedding(_)));
    }

    #[tokio::test]
    async fn test_mock_generator_streams_fragments() {
        let generator = MockGenerator::answering(&["a", "b", "c"]);
        let mut stream = generator.stream(&make_request()).await.unwrap();

        let mut collected = Vec::new();
        while let Some(item) = stream.next_fragment().await {
            collected.push(item.unwrap());
        }
        assert_eq!(collected, vec!["a", "b", "c"]);
        assert_eq!(generator.stream_calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_generator_mid_stream_error() {
        let generator = MockGenerator::with_fragments(vec![
            Ok("partial".to_string()),
            Err("connection reset".to_string()),
        ]);
        let mut stream = generator.stream(&make_request()).await.unwrap();

        assert_eq!(stream.next_fragment().await.unwrap().unwrap(), "partial");
        let err = stream.next_fragment().await.unwrap().unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }

    #[tokio::test]
    async fn test_mock_generator_open_failure() {
        let generator = MockGenerator::failing_to_open();
        assert!(generator.stream(&make_request()).await.is_err());
        assert_eq!(generator.stream_calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_generator_completion() {
        let generator = MockGenerator::answering(&[]).with_completion("rewritten query");
        let reply = generator.complete(&make_request()).await.unwrap();
        assert_eq!(reply, "rewritten query");
        assert_eq!(generator.complete_calls(), 1);
        assert_eq!(
            generator.last_complete().unwrap().messages[0].content,
            "hi"
        );
    }

    #[tokio::test]
    async fn test_mock_generator_completion_unconfigured_fails() {
        let generator = MockGenerator::answering(&["x"]);
        assert!(generator.complete(&make_request()).await.is_err());
    }
}
