//! Passage retrieval for canon.
//!
//! Turns a search query into a ranked, deduplicated set of archive passages:
//! vector similarity over an in-memory cosine index, with a keyword fallback
//! when the semantic search comes back too thin.

pub mod engine;
pub mod index;

pub use engine::RetrievalEngine;
pub use index::{IndexHit, PassageIndex};
