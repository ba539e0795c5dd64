//! Domain types shared across the pipeline.
//!
//! Clients, conversations, and messages are the durable records owned by the
//! message store. Archive passages are read-only pre-embedded content chunks.
//! `Source` and `RetrievedPassage` are transient per-request projections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Source type recorded for a passage when the ingestion process left it
/// blank.
pub const DEFAULT_SOURCE_TYPE: &str = "article";

/// Role of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Parse a stored role string. Unknown values are rejected rather than
    /// defaulted; the schema CHECK constraint should make this unreachable.
    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// A persona/tenant whose published work the service answers questions about.
///
/// Immutable after creation; resolved once per request by slug.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: Uuid,
    /// Stable external key used by callers.
    pub slug: String,
    pub display_name: String,
    /// Optional per-client override of the default knowledge document.
    pub persona_prompt: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A thread of turns belonging to one client.
///
/// Created lazily on the first message of a session. Timestamps and the
/// running message count are updated (best-effort) after each completed
/// assistant turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub client_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub last_message_at: DateTime<Utc>,
    pub message_count: u32,
}

/// One conversation turn. Append-only; never mutated after insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub client_id: Uuid,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A pre-embedded fragment of the person's published content.
///
/// Produced by an external ingestion process; read-only from this service's
/// perspective.
#[derive(Debug, Clone)]
pub struct Passage {
    pub id: Uuid,
    pub client_id: Uuid,
    pub text: String,
    pub source_title: String,
    pub source_url: Option<String>,
    pub source_type: String,
    pub published_at: Option<DateTime<Utc>>,
    pub embedding: Vec<f32>,
}

/// A passage matched for one request, carrying its similarity score.
///
/// Similarity is 0.0 for keyword-matched passages, signalling a lexical
/// rather than semantic match.
#[derive(Debug, Clone)]
pub struct RetrievedPassage {
    pub id: Uuid,
    pub text: String,
    pub source_title: String,
    pub source_url: Option<String>,
    pub source_type: String,
    pub published_at: Option<DateTime<Utc>>,
    pub similarity: f64,
}

impl RetrievedPassage {
    /// Project this passage into the citation shape returned to the caller.
    pub fn to_source(&self) -> Source {
        Source {
            title: self.source_title.clone(),
            url: self.source_url.clone(),
            source_type: if self.source_type.is_empty() {
                DEFAULT_SOURCE_TYPE.to_string()
            } else {
                self.source_type.clone()
            },
            similarity: self.similarity,
        }
    }
}

/// A citation returned to the caller in the final `sources` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub url: Option<String>,
    #[serde(rename = "type")]
    pub source_type: String,
    pub similarity: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_retrieved(source_type: &str, similarity: f64) -> RetrievedPassage {
        RetrievedPassage {
            id: Uuid::new_v4(),
            text: "passage text".to_string(),
            source_title: "On Rivers".to_string(),
            source_url: Some("https://example.com/rivers".to_string()),
            source_type: source_type.to_string(),
            published_at: None,
            similarity,
        }
    }

    #[test]
    fn test_role_round_trip() {
        assert_eq!(Role::parse(Role::User.as_str()), Some(Role::User));
        assert_eq!(Role::parse(Role::Assistant.as_str()), Some(Role::Assistant));
        assert_eq!(Role::parse("system"), None);
    }

    #[test]
    fn test_role_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), "\"user\"");
        assert_eq!(
            serde_json::from_str::<Role>("\"assistant\"").unwrap(),
            Role::Assistant
        );
    }

    #[test]
    fn test_to_source_copies_fields() {
        let p = make_retrieved("podcast", 0.82);
        let s = p.to_source();
        assert_eq!(s.title, "On Rivers");
        assert_eq!(s.url.as_deref(), Some("https://example.com/rivers"));
        assert_eq!(s.source_type, "podcast");
        assert_eq!(s.similarity, 0.82);
    }

    #[test]
    fn test_to_source_defaults_empty_type() {
        let p = make_retrieved("", 0.0);
        assert_eq!(p.to_source().source_type, DEFAULT_SOURCE_TYPE);
    }

    #[test]
    fn test_source_serializes_type_field() {
        let s = make_retrieved("article", 0.5).to_source();
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["type"], "article");
        assert!(json.get("source_type").is_none());
    }

    #[test]
    fn test_source_null_url_serializes_as_null() {
        let mut p = make_retrieved("article", 0.5);
        p.source_url = None;
        let json = serde_json::to_value(p.to_source()).unwrap();
        assert!(json["url"].is_null());
    }
}
