//! SQLite-backed persistence for canon.
//!
//! Owns the message store (clients, conversations, messages) and the
//! read-side of the archive passage store. All writes are append-only per
//! conversation; passages are written only by the external ingestion process
//! (a minimal insert is provided for index warm-up tooling and tests).

pub mod db;
pub mod migrations;
pub mod store;

pub use db::Database;
pub use store::{ClientStore, ConversationStore, MessageStore, PassageStore};
