//! Upstream model-service clients for canon.
//!
//! The pipeline talks to two external collaborators: an embedding service
//! (text to vector) and a generation service (chat-style messages to a
//! streamed answer). Both sit behind traits so the pipeline can be driven by
//! the scriptable implementations in [`mock`] during tests.

pub mod embedder;
pub mod generator;
pub mod mock;
pub mod sse;

pub use embedder::{Embedder, HttpEmbedder};
pub use generator::{ChatMessage, GenerationRequest, Generator, HttpGenerator, TokenStream};
pub use sse::SseDecoder;
