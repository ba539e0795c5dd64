//! Application state shared across route handlers.

use std::sync::Arc;

use canon_chat::ChatPipeline;

/// Shared application state, cheap to clone across handler tasks.
#[derive(Clone)]
pub struct AppState {
    /// The conversational pipeline; owns stores, retrieval, and the
    /// upstream clients.
    pub pipeline: Arc<ChatPipeline>,
    /// Static API key for /chat. Empty disables authentication.
    pub api_key: String,
}

impl AppState {
    pub fn new(pipeline: Arc<ChatPipeline>, api_key: String) -> Self {
        Self { pipeline, api_key }
    }
}
