//! Core types for the canon conversational retrieval service.
//!
//! Defines the domain model (clients, conversations, messages, archive
//! passages, citation sources), the error taxonomy, and the TOML
//! configuration shared by all other crates.

pub mod config;
pub mod error;
pub mod types;
