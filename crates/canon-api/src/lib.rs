//! canon API crate - axum HTTP server and the SSE chat endpoint.
//!
//! Exposes POST /chat (JSON request in, SSE event stream out) and a public
//! GET /health, with static bearer-key authentication and permissive CORS
//! for the embedding widget.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
