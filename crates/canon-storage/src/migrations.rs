//! Database schema migrations.
//!
//! Applies the initial schema: clients, conversations, messages, passages,
//! and the schema_migrations tracking table.

use rusqlite::Connection;
use tracing::info;

use canon_core::error::CanonError;

/// Run all pending database migrations.
///
/// Currently implements the initial schema (version 1). Future migrations
/// can be added by checking the current version and applying incremental changes.
pub fn run_migrations(conn: &Connection) -> Result<(), CanonError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| CanonError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| CanonError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), CanonError> {
    conn.execute_batch(
        "
        -- Personas/tenants. Immutable after creation.
        CREATE TABLE IF NOT EXISTS clients (
            id              TEXT PRIMARY KEY NOT NULL,
            slug            TEXT NOT NULL UNIQUE,
            display_name    TEXT NOT NULL DEFAULT '',
            persona_prompt  TEXT,
            created_at      INTEGER NOT NULL
        );

        -- Conversation threads, created lazily on first message.
        CREATE TABLE IF NOT EXISTS conversations (
            id              TEXT PRIMARY KEY NOT NULL,
            client_id       TEXT NOT NULL,
            created_at      INTEGER NOT NULL,
            last_message_at INTEGER NOT NULL,
            message_count   INTEGER NOT NULL DEFAULT 0,
            FOREIGN KEY (client_id) REFERENCES clients(id)
        );

        CREATE INDEX IF NOT EXISTS idx_conversations_client
            ON conversations (client_id, last_message_at DESC);

        -- Append-only conversation turns. Ordering is (created_at, rowid);
        -- created_at is epoch milliseconds.
        CREATE TABLE IF NOT EXISTS messages (
            id              TEXT PRIMARY KEY NOT NULL,
            conversation_id TEXT NOT NULL,
            client_id       TEXT NOT NULL,
            role            TEXT NOT NULL
                            CHECK (role IN ('user', 'assistant')),
            content         TEXT NOT NULL DEFAULT '',
            created_at      INTEGER NOT NULL,
            FOREIGN KEY (conversation_id) REFERENCES conversations(id)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages (conversation_id, created_at ASC);

        -- Pre-embedded archive passages, written by the ingestion process.
        -- embedding is little-endian f32 bytes.
        CREATE TABLE IF NOT EXISTS passages (
            id              TEXT PRIMARY KEY NOT NULL,
            client_id       TEXT NOT NULL,
            text            TEXT NOT NULL DEFAULT '',
            source_title    TEXT NOT NULL DEFAULT '',
            source_url      TEXT,
            source_type     TEXT NOT NULL DEFAULT 'article',
            published_at    INTEGER,
            embedding       BLOB NOT NULL,
            FOREIGN KEY (client_id) REFERENCES clients(id)
        );

        CREATE INDEX IF NOT EXISTS idx_passages_client
            ON passages (client_id);

        -- Record migration.
        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| CanonError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
