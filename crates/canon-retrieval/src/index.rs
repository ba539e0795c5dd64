//! In-memory vector index with brute-force cosine similarity search.
//!
//! Archive passages are pre-embedded by the ingestion process; this index is
//! warmed from the passage store at startup. Brute-force search is O(n) per
//! query, which is acceptable for a single person's archive.

use std::collections::HashMap;
use std::sync::RwLock;

use uuid::Uuid;

use canon_core::error::CanonError;
use canon_core::types::Passage;

/// A single hit returned from a vector search.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    /// The ID of the matching passage.
    pub id: Uuid,
    /// Cosine similarity score.
    pub similarity: f64,
}

#[derive(Debug)]
struct IndexEntry {
    client_id: Uuid,
    embedding: Vec<f32>,
}

/// In-memory passage index using brute-force cosine similarity.
///
/// Thread-safe via interior RwLock; shared across requests behind an Arc.
#[derive(Debug, Default)]
pub struct PassageIndex {
    entries: RwLock<HashMap<Uuid, IndexEntry>>,
}

impl PassageIndex {
    /// Create a new empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an embedding scoped to a client.
    ///
    /// Overwrites any existing entry with the same ID.
    pub fn insert(
        &self,
        id: Uuid,
        client_id: Uuid,
        embedding: Vec<f32>,
    ) -> Result<(), CanonError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| CanonError::Retrieval(format!("Lock poisoned: {}", e)))?;
        entries.insert(
            id,
            IndexEntry {
                client_id,
                embedding,
            },
        );
        Ok(())
    }

    /// Insert a passage's embedding.
    pub fn insert_passage(&self, passage: &Passage) -> Result<(), CanonError> {
        self.insert(passage.id, passage.client_id, passage.embedding.clone())
    }

    /// Search the client's passages for the top `k` nearest neighbors above
    /// `min_similarity`, sorted by descending similarity.
    pub fn search(
        &self,
        client_id: Uuid,
        query: &[f32],
        k: usize,
        min_similarity: f64,
    ) -> Result<Vec<IndexHit>, CanonError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| CanonError::Retrieval(format!("Lock poisoned: {}", e)))?;

        let mut scored: Vec<IndexHit> = entries
            .iter()
            .filter(|(_, entry)| entry.client_id == client_id)
            .map(|(id, entry)| IndexHit {
                id: *id,
                similarity: cosine_similarity(query, &entry.embedding),
            })
            .filter(|hit| hit.similarity >= min_similarity)
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);

        Ok(scored)
    }

    /// Return the number of embeddings currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// Return true if the index contains no embeddings.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Compute cosine similarity between two vectors.
///
/// Returns 0.0 if either vector has zero magnitude or the lengths differ.
fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (*x as f64) * (*y as f64))
        .sum();

    let mag_a: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}
