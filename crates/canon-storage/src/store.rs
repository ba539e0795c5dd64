//! Repository implementations for SQLite-backed persistence.
//!
//! Provides ClientStore, ConversationStore, MessageStore, and PassageStore
//! operating on the Database struct using raw SQL. Message timestamps are
//! epoch milliseconds; intra-conversation ordering is (created_at, rowid).

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use canon_core::error::CanonError;
use canon_core::types::{Client, Conversation, Message, Passage, Role};

use crate::db::Database;

/// Repository for client (persona) records.
#[derive(Clone)]
pub struct ClientStore {
    db: Arc<Database>,
}

impl ClientStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new client. Clients are immutable after creation.
    pub fn insert(&self, client: &Client) -> Result<(), CanonError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO clients (id, slug, display_name, persona_prompt, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    client.id.to_string(),
                    client.slug,
                    client.display_name,
                    client.persona_prompt,
                    client.created_at.timestamp_millis(),
                ],
            )
            .map_err(|e| CanonError::Storage(format!("Failed to insert client: {}", e)))?;
            Ok(())
        })
    }

    /// Look up a client by its stable external slug.
    pub fn find_by_slug(&self, slug: &str) -> Result<Option<Client>, CanonError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, slug, display_name, persona_prompt, created_at
                     FROM clients WHERE slug = ?1",
                )
                .map_err(|e| CanonError::Storage(e.to_string()))?;

            let result = stmt
                .query_row(rusqlite::params![slug], |row| Ok(row_to_client(row)))
                .optional()
                .map_err(|e| CanonError::Storage(e.to_string()))?;

            match result {
                Some(client) => Ok(Some(client?)),
                None => Ok(None),
            }
        })
    }
}

/// Repository for conversation threads.
#[derive(Clone)]
pub struct ConversationStore {
    db: Arc<Database>,
}

impl ConversationStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create a new conversation owned by the given client.
    pub fn create(&self, client_id: Uuid) -> Result<Conversation, CanonError> {
        let now = Utc::now();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            client_id,
            created_at: now,
            last_message_at: now,
            message_count: 0,
        };

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, client_id, created_at, last_message_at, message_count)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    conversation.id.to_string(),
                    conversation.client_id.to_string(),
                    conversation.created_at.timestamp_millis(),
                    conversation.last_message_at.timestamp_millis(),
                    conversation.message_count,
                ],
            )
            .map_err(|e| CanonError::Storage(format!("Failed to create conversation: {}", e)))?;
            Ok(())
        })?;

        Ok(conversation)
    }

    /// Find a conversation by ID.
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Conversation>, CanonError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, client_id, created_at, last_message_at, message_count
                     FROM conversations WHERE id = ?1",
                )
                .map_err(|e| CanonError::Storage(e.to_string()))?;

            let result = stmt
                .query_row(rusqlite::params![id.to_string()], |row| {
                    Ok(row_to_conversation(row))
                })
                .optional()
                .map_err(|e| CanonError::Storage(e.to_string()))?;

            match result {
                Some(conversation) => Ok(Some(conversation?)),
                None => Ok(None),
            }
        })
    }

    /// Update last-activity timestamp and running message count.
    ///
    /// Called after a successful assistant turn. Callers treat failure as
    /// non-fatal.
    pub fn touch(&self, id: Uuid, message_count: u32) -> Result<(), CanonError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE conversations SET last_message_at = ?1, message_count = ?2 WHERE id = ?3",
                rusqlite::params![
                    Utc::now().timestamp_millis(),
                    message_count,
                    id.to_string()
                ],
            )
            .map_err(|e| CanonError::Storage(format!("Failed to touch conversation: {}", e)))?;
            Ok(())
        })
    }
}

/// Repository for conversation turns.
#[derive(Clone)]
pub struct MessageStore {
    db: Arc<Database>,
}

impl MessageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append one turn. Messages are never mutated after insertion and the
    /// write is never retried; the caller decides whether failure is fatal.
    pub fn append(
        &self,
        conversation_id: Uuid,
        client_id: Uuid,
        role: Role,
        content: &str,
    ) -> Result<Message, CanonError> {
        let message = Message {
            id: Uuid::new_v4(),
            conversation_id,
            client_id,
            role,
            content: content.to_string(),
            created_at: Utc::now(),
        };

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (id, conversation_id, client_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    message.id.to_string(),
                    message.conversation_id.to_string(),
                    message.client_id.to_string(),
                    message.role.as_str(),
                    message.content,
                    message.created_at.timestamp_millis(),
                ],
            )
            .map_err(|e| CanonError::Storage(format!("Failed to append message: {}", e)))?;
            Ok(())
        })?;

        Ok(message)
    }

    /// Load prior turns for a conversation: the most recent `limit` messages,
    /// returned oldest first.
    pub fn load_history(
        &self,
        conversation_id: Uuid,
        limit: u32,
    ) -> Result<Vec<Message>, CanonError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, conversation_id, client_id, role, content, created_at
                     FROM messages
                     WHERE conversation_id = ?1
                     ORDER BY created_at DESC, rowid DESC
                     LIMIT ?2",
                )
                .map_err(|e| CanonError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![conversation_id.to_string(), limit], |row| {
                    Ok(row_to_message(row))
                })
                .map_err(|e| CanonError::Storage(e.to_string()))?;

            let mut messages = Vec::new();
            for row in rows {
                let message = row.map_err(|e| CanonError::Storage(e.to_string()))??;
                messages.push(message);
            }
            // Query returns newest first; callers want chronological order.
            messages.reverse();
            Ok(messages)
        })
    }
}

/// Repository for archive passages.
#[derive(Clone)]
pub struct PassageStore {
    db: Arc<Database>,
}

impl PassageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a pre-embedded passage. Used by index warm-up tooling and
    /// tests; the full ingestion pipeline lives outside this service.
    pub fn insert(&self, passage: &Passage) -> Result<(), CanonError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO passages
                 (id, client_id, text, source_title, source_url, source_type, published_at, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    passage.id.to_string(),
                    passage.client_id.to_string(),
                    passage.text,
                    passage.source_title,
                    passage.source_url,
                    passage.source_type,
                    passage.published_at.map(|t| t.timestamp_millis()),
                    embedding_to_blob(&passage.embedding),
                ],
            )
            .map_err(|e| CanonError::Storage(format!("Failed to insert passage: {}", e)))?;
            Ok(())
        })
    }

    /// Find a passage by ID.
    pub fn find_by_id(&self, id: Uuid) -> Result<Option<Passage>, CanonError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, client_id, text, source_title, source_url, source_type, published_at, embedding
                     FROM passages WHERE id = ?1",
                )
                .map_err(|e| CanonError::Storage(e.to_string()))?;

            let result = stmt
                .query_row(rusqlite::params![id.to_string()], |row| {
                    Ok(row_to_passage(row))
                })
                .optional()
                .map_err(|e| CanonError::Storage(e.to_string()))?;

            match result {
                Some(passage) => Ok(Some(passage?)),
                None => Ok(None),
            }
        })
    }

    /// Load every passage for one client, in store order.
    pub fn for_client(&self, client_id: Uuid) -> Result<Vec<Passage>, CanonError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, client_id, text, source_title, source_url, source_type, published_at, embedding
                     FROM passages WHERE client_id = ?1 ORDER BY rowid",
                )
                .map_err(|e| CanonError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map(rusqlite::params![client_id.to_string()], |row| {
                    Ok(row_to_passage(row))
                })
                .map_err(|e| CanonError::Storage(e.to_string()))?;

            let mut passages = Vec::new();
            for row in rows {
                let passage = row.map_err(|e| CanonError::Storage(e.to_string()))??;
                passages.push(passage);
            }
            Ok(passages)
        })
    }

    /// Load every passage in the archive, in store order. Used to warm the
    /// vector index at startup.
    pub fn all(&self) -> Result<Vec<Passage>, CanonError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, client_id, text, source_title, source_url, source_type, published_at, embedding
                     FROM passages ORDER BY rowid",
                )
                .map_err(|e| CanonError::Storage(e.to_string()))?;

            let rows = stmt
                .query_map([], |row| Ok(row_to_passage(row)))
                .map_err(|e| CanonError::Storage(e.to_string()))?;

            let mut passages = Vec::new();
            for row in rows {
                let passage = row.map_err(|e| CanonError::Storage(e.to_string()))??;
                passages.push(passage);
            }
            Ok(passages)
        })
    }

    /// Case-insensitive substring search, OR-combined across keywords,
    /// scoped to one client, in store order.
    pub fn keyword_search(
        &self,
        client_id: Uuid,
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<Passage>, CanonError> {
        if keywords.is_empty() {
            return Ok(Vec::new());
        }

        self.db.with_conn(|conn| {
            let clauses: Vec<String> = (0..keywords.len())
                .map(|i| format!("text LIKE ?{}", i + 2))
                .collect();
            let sql = format!(
                "SELECT id, client_id, text, source_title, source_url, source_type, published_at, embedding
                 FROM passages
                 WHERE client_id = ?1 AND ({})
                 ORDER BY rowid
                 LIMIT {}",
                clauses.join(" OR "),
                limit as i64,
            );

            let mut stmt = conn
                .prepare(&sql)
                .map_err(|e| CanonError::Storage(e.to_string()))?;

            let mut params: Vec<String> = Vec::with_capacity(keywords.len() + 1);
            params.push(client_id.to_string());
            for keyword in keywords {
                params.push(format!("%{}%", keyword));
            }

            let rows = stmt
                .query_map(rusqlite::params_from_iter(params), |row| {
                    Ok(row_to_passage(row))
                })
                .map_err(|e| CanonError::Storage(e.to_string()))?;

            let mut passages = Vec::new();
            for row in rows {
                let passage = row.map_err(|e| CanonError::Storage(e.to_string()))??;
                passages.push(passage);
            }
            Ok(passages)
        })
    }
}

// ============================================================================
// Helper functions for row-to-entity conversion.
// ============================================================================

fn row_to_client(row: &rusqlite::Row<'_>) -> Result<Client, CanonError> {
    let id_str: String = row.get(0).map_err(|e| CanonError::Storage(e.to_string()))?;
    let slug: String = row.get(1).map_err(|e| CanonError::Storage(e.to_string()))?;
    let display_name: String = row.get(2).map_err(|e| CanonError::Storage(e.to_string()))?;
    let persona_prompt: Option<String> =
        row.get(3).map_err(|e| CanonError::Storage(e.to_string()))?;
    let created_at: i64 = row.get(4).map_err(|e| CanonError::Storage(e.to_string()))?;

    Ok(Client {
        id: parse_uuid(&id_str)?,
        slug,
        display_name,
        persona_prompt,
        created_at: millis_to_datetime(created_at),
    })
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> Result<Conversation, CanonError> {
    let id_str: String = row.get(0).map_err(|e| CanonError::Storage(e.to_string()))?;
    let client_id_str: String = row.get(1).map_err(|e| CanonError::Storage(e.to_string()))?;
    let created_at: i64 = row.get(2).map_err(|e| CanonError::Storage(e.to_string()))?;
    let last_message_at: i64 = row.get(3).map_err(|e| CanonError::Storage(e.to_string()))?;
    let message_count: u32 = row.get(4).map_err(|e| CanonError::Storage(e.to_string()))?;

    Ok(Conversation {
        id: parse_uuid(&id_str)?,
        client_id: parse_uuid(&client_id_str)?,
        created_at: millis_to_datetime(created_at),
        last_message_at: millis_to_datetime(last_message_at),
        message_count,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, CanonError> {
    let id_str: String = row.get(0).map_err(|e| CanonError::Storage(e.to_string()))?;
    let conversation_id_str: String =
        row.get(1).map_err(|e| CanonError::Storage(e.to_string()))?;
    let client_id_str: String = row.get(2).map_err(|e| CanonError::Storage(e.to_string()))?;
    let role_str: String = row.get(3).map_err(|e| CanonError::Storage(e.to_string()))?;
    let content: String = row.get(4).map_err(|e| CanonError::Storage(e.to_string()))?;
    let created_at: i64 = row.get(5).map_err(|e| CanonError::Storage(e.to_string()))?;

    let role = Role::parse(&role_str)
        .ok_or_else(|| CanonError::Storage(format!("Invalid role: {}", role_str)))?;

    Ok(Message {
        id: parse_uuid(&id_str)?,
        conversation_id: parse_uuid(&conversation_id_str)?,
        client_id: parse_uuid(&client_id_str)?,
        role,
        content,
        created_at: millis_to_datetime(created_at),
    })
}

fn row_to_passage(row: &rusqlite::Row<'_>) -> Result<Passage, CanonError> {
    let id_str: String = row.get(0).map_err(|e| CanonError::Storage(e.to_string()))?;
    let client_id_str: String = row.get(1).map_err(|e| CanonError::Storage(e.to_string()))?;
    let text: String = row.get(2).map_err(|e| CanonError::Storage(e.to_string()))?;
    let source_title: String = row.get(3).map_err(|e| CanonError::Storage(e.to_string()))?;
    let source_url: Option<String> = row.get(4).map_err(|e| CanonError::Storage(e.to_string()))?;
    let source_type: String = row.get(5).map_err(|e| CanonError::Storage(e.to_string()))?;
    let published_at: Option<i64> = row.get(6).map_err(|e| CanonError::Storage(e.to_string()))?;
    let embedding_blob: Vec<u8> = row.get(7).map_err(|e| CanonError::Storage(e.to_string()))?;

    Ok(Passage {
        id: parse_uuid(&id_str)?,
        client_id: parse_uuid(&client_id_str)?,
        text,
        source_title,
        source_url,
        source_type,
        published_at: published_at.map(millis_to_datetime),
        embedding: blob_to_embedding(&embedding_blob),
    })
}

fn parse_uuid(s: &str) -> Result<Uuid, CanonError> {
    Uuid::parse_str(s).map_err(|e| CanonError::Storage(format!("Invalid UUID: {}", e)))
}

fn millis_to_datetime(millis: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(millis).single().unwrap_or_default()
}

/// Encode an embedding as little-endian f32 bytes.
fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Decode little-endian f32 bytes back into an embedding. Trailing bytes
/// that do not form a full f32 are dropped.
fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Extension trait for rusqlite to support optional query results.
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
