//! Follow-up detection and query rewriting.
//!
//! Short, context-dependent follow-ups ("tell me more about that") retrieve
//! garbage when used verbatim as a search query. When the lexical heuristic
//! fires, a single strict generation call rewrites the message into a
//! standalone query. The step is best-effort: any failure falls back to the
//! original message, and the original is always what gets persisted.

use std::sync::Arc;

use regex::Regex;
use tracing::{debug, warn};

use canon_core::config::RewriteConfig;
use canon_core::error::{CanonError, Result};
use canon_core::types::Message;
use canon_llm::{ChatMessage, GenerationRequest, Generator};

/// System instruction for the rewrite call.
const REWRITE_SYSTEM_PROMPT: &str = "Given the conversation history, rewrite the user's \
follow-up message as a standalone search query. Output ONLY the search query, nothing else. \
Keep it under 15 words.";

/// Referential and follow-up lexical cues. Deliberately false-positive
/// tolerant: over-triggering the rewrite is cheaper than retrieving garbage.
const CUE_PATTERN: &str = r"(?i)\b(that|this|it|those|these|what you|you just|you said|you mentioned|about that|more about|more on|earlier|before|above|tell me more|expand|elaborate|go deeper|keep going)\b";

/// Minimum length for an accepted rewrite; anything shorter is noise.
const MIN_REWRITE_LEN: usize = 3;

/// Decides whether a message is a context-dependent follow-up.
///
/// The lexical implementation below is a classifier substitute; swapping in a
/// learned model only requires another implementation of this trait.
pub trait FollowUpPredicate: Send + Sync {
    /// `history_len` counts loaded history entries, including the current
    /// user message.
    fn is_follow_up(&self, message: &str, history_len: usize) -> bool;
}

/// Lexical-cue follow-up detector.
///
/// Fires only when there is conversational context to refer back to
/// (`history_len > 1`), the message is short, and it contains a referential
/// cue.
pub struct CueDetector {
    max_message_len: usize,
    cues: Regex,
}

impl CueDetector {
    pub fn new(max_message_len: usize) -> Result<Self> {
        let cues = Regex::new(CUE_PATTERN)
            .map_err(|e| CanonError::Config(format!("Invalid cue pattern: {}", e)))?;
        Ok(Self {
            max_message_len,
            cues,
        })
    }
}

impl FollowUpPredicate for CueDetector {
    fn is_follow_up(&self, message: &str, history_len: usize) -> bool {
        history_len > 1
            && message.chars().count() < self.max_message_len
            && self.cues.is_match(message)
    }
}

/// Rewrites follow-up messages into standalone search queries.
pub struct QueryRewriter {
    generator: Arc<dyn Generator>,
    detector: Box<dyn FollowUpPredicate>,
    config: RewriteConfig,
}

impl QueryRewriter {
    pub fn new(
        generator: Arc<dyn Generator>,
        detector: Box<dyn FollowUpPredicate>,
        config: RewriteConfig,
    ) -> Self {
        Self {
            generator,
            detector,
            config,
        }
    }

    /// Return the search query to use for retrieval.
    ///
    /// Non-follow-ups pass through untouched without a generation call. For
    /// follow-ups, the rewrite call is seeded with the trailing history
    /// window; on any failure the original message is returned verbatim.
    /// This step never fails the overall request.
    pub async fn rewrite(&self, message: &str, history: &[Message]) -> String {
        if !self.config.enabled || !self.detector.is_follow_up(message, history.len()) {
            return message.to_string();
        }

        let window_start = history.len().saturating_sub(self.config.history_window);
        let mut messages: Vec<ChatMessage> = history[window_start..]
            .iter()
            .map(|m| ChatMessage::new(m.role.as_str(), m.content.clone()))
            .collect();
        messages.push(ChatMessage::new(
            "user",
            format!("Rewrite this as a standalone search query: \"{}\"", message),
        ));

        let request = GenerationRequest {
            system: REWRITE_SYSTEM_PROMPT.to_string(),
            messages,
            max_tokens: self.config.max_tokens,
            temperature: 0.0,
        };

        match self.generator.complete(&request).await {
            Ok(expanded) => {
                let expanded = expanded.trim();
                if expanded.chars().count() > MIN_REWRITE_LEN {
                    debug!(original = message, rewritten = expanded, "Query rewritten");
                    expanded.to_string()
                } else {
                    message.to_string()
                }
            }
            Err(e) => {
                warn!(error = %e, "Query rewrite failed; using original message");
                message.to_string()
            }
        }
    }
}
