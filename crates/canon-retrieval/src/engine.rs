//! The retrieval engine: vector similarity with a keyword fallback.
//!
//! Embedding-service and vector-search failures are fatal for the request;
//! silently degrading to "no context" would produce ungrounded answers
//! without signalling the caller. The keyword fallback is best-effort.

use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use canon_core::config::RetrievalConfig;
use canon_core::error::{CanonError, Result};
use canon_core::types::{Passage, RetrievedPassage};
use canon_llm::Embedder;
use canon_storage::PassageStore;

use crate::index::PassageIndex;

/// Ranked, deduplicated passage retrieval for one client's archive.
pub struct RetrievalEngine {
    embedder: Arc<dyn Embedder>,
    index: Arc<PassageIndex>,
    passages: PassageStore,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<PassageIndex>,
        passages: PassageStore,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            passages,
            config,
        }
    }

    /// Retrieve passages for a search query.
    ///
    /// Vector hits come first in rank order; if fewer than 2 are found, the
    /// keyword fallback appends lexical matches (similarity 0.0) that are
    /// not already present.
    pub async fn retrieve(
        &self,
        client_id: Uuid,
        query: &str,
    ) -> Result<Vec<RetrievedPassage>> {
        let embedding = self.embedder.embed(query).await?;

        let hits = self.index.search(
            client_id,
            &embedding,
            self.config.top_k,
            self.config.min_similarity,
        )?;

        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let passage = self.passages.find_by_id(hit.id)?.ok_or_else(|| {
                CanonError::Retrieval(format!("Indexed passage missing from store: {}", hit.id))
            })?;
            results.push(to_retrieved(passage, hit.similarity));
        }

        if results.len() < 2 {
            self.keyword_fallback(client_id, query, &mut results);
        }

        debug!(
            client_id = %client_id,
            results = results.len(),
            "Retrieval completed"
        );
        Ok(results)
    }

    /// Append keyword matches not already present. Never fails the request.
    fn keyword_fallback(
        &self,
        client_id: Uuid,
        query: &str,
        results: &mut Vec<RetrievedPassage>,
    ) {
        let keywords = keyword_terms(query, self.config.min_keyword_len);
        if keywords.is_empty() {
            return;
        }

        match self
            .passages
            .keyword_search(client_id, &keywords, self.config.keyword_limit)
        {
            Ok(matches) => {
                for passage in matches {
                    if results.iter().any(|r| r.id == passage.id) {
                        continue;
                    }
                    results.push(to_retrieved(passage, 0.0));
                }
            }
            Err(e) => {
                warn!(error = %e, "Keyword fallback failed; returning vector results only");
            }
        }
    }
}

/// Tokenize a query into lowercase keyword terms longer than `min_len`
/// characters.
pub fn keyword_terms(query: &str, min_len: usize) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .filter(|word| word.chars().count() > min_len)
        .map(str::to_string)
        .collect()
}

fn to_retrieved(passage: Passage, similarity: f64) -> RetrievedPassage {
    RetrievedPassage {
        id: passage.id,
        text: passage.text,
        source_title: passage.source_title,
        source_url: passage.source_url,
        source_type: passage.source_type,
        published_at: passage.published_at,
        similarity,
    }
}
