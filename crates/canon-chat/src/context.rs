//! Prompt assembly for the generation request.
//!
//! The knowledge document is the system prompt and primary knowledge source;
//! retrieved passages are appended to the current turn as secondary detail.
//! The augmented turn exists only inside the generation request: the
//! persisted user message is always the unmodified original.

use chrono::Datelike;

use canon_core::config::GenerationConfig;
use canon_core::types::{Message, RetrievedPassage, DEFAULT_SOURCE_TYPE};
use canon_llm::{ChatMessage, GenerationRequest};

/// Divider between rendered passages in the supplementary block.
const PASSAGE_DIVIDER: &str = "\n\n---\n\n";

/// Build the generation request for one turn.
///
/// `prior` is the conversation history excluding the current user message;
/// `message` is the verbatim current message.
pub fn build_request(
    knowledge_document: &str,
    prior: &[Message],
    message: &str,
    passages: &[RetrievedPassage],
    config: &GenerationConfig,
) -> GenerationRequest {
    let mut messages: Vec<ChatMessage> = prior
        .iter()
        .map(|m| ChatMessage::new(m.role.as_str(), m.content.clone()))
        .collect();

    let current = match supplement_block(passages) {
        Some(block) => format!(
            "{}\n\nADDITIONAL CONTEXT FROM CONTENT ARCHIVE:\n<retrieved_context>\n{}\n</retrieved_context>\n\nUse the knowledge document above as your primary reference. The additional context passages may contain specific quotes or details; use them to supplement your answers when relevant.",
            message, block
        ),
        None => message.to_string(),
    };
    messages.push(ChatMessage::new("user", current));

    GenerationRequest {
        system: knowledge_document.to_string(),
        messages,
        max_tokens: config.max_tokens,
        temperature: config.temperature,
    }
}

/// Render the retrieved passages, or `None` when there is nothing to add.
fn supplement_block(passages: &[RetrievedPassage]) -> Option<String> {
    if passages.is_empty() {
        return None;
    }

    let rendered: Vec<String> = passages
        .iter()
        .enumerate()
        .map(|(i, p)| render_passage(i + 1, p))
        .collect();
    Some(rendered.join(PASSAGE_DIVIDER))
}

fn render_passage(number: usize, passage: &RetrievedPassage) -> String {
    let source_type = if passage.source_type.is_empty() {
        DEFAULT_SOURCE_TYPE
    } else {
        &passage.source_type
    };
    let year = passage
        .published_at
        .map(|d| d.year().to_string())
        .unwrap_or_else(|| "undated".to_string());

    format!(
        "[Source {}: \"{}\" ({}, {})]\n{}",
        number, passage.source_title, source_type, year, passage.text
    )
}
