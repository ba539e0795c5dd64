use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CanonError, Result};

/// Top-level configuration for the canon service.
///
/// Loaded from `canon.toml` by default. Each section corresponds to one
/// pipeline stage or cross-cutting concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CanonConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub persona: PersonaConfig,
    pub chat: ChatConfig,
    pub rewrite: RewriteConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
}

impl Default for CanonConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            persona: PersonaConfig::default(),
            chat: ChatConfig::default(),
            rewrite: RewriteConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
        }
    }
}

impl CanonConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: CanonConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| CanonError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Static API key required on /chat as a bearer token. Empty disables
    /// authentication.
    pub api_key: String,
    /// Log filter passed to tracing-subscriber (e.g. "info", "canon=debug").
    pub log_filter: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            api_key: String::new(),
            log_filter: "info".to_string(),
        }
    }
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    pub db_path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: "canon.db".to_string(),
        }
    }
}

/// Persona settings: which client a request resolves to by default, and the
/// static knowledge document used as the primary system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    /// Client slug used when the request omits `client_slug`.
    pub default_client_slug: String,
    /// Path to the knowledge document loaded at startup. A per-client
    /// `persona_prompt` overrides it.
    pub knowledge_document_path: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            default_client_slug: "persona".to_string(),
            knowledge_document_path: "knowledge.md".to_string(),
        }
    }
}

/// Conversation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Maximum number of prior messages loaded into the prompt.
    pub history_limit: u32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self { history_limit: 40 }
    }
}

/// Follow-up query rewriting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteConfig {
    /// Whether follow-up rewriting is enabled at all.
    pub enabled: bool,
    /// Messages at or above this length are never treated as follow-ups.
    pub max_message_len: usize,
    /// How many trailing history entries seed the rewrite call.
    pub history_window: usize,
    /// Token budget for the rewrite call.
    pub max_tokens: u32,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_message_len: 120,
            history_window: 6,
            max_tokens: 60,
        }
    }
}

/// Retrieval settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Maximum passages requested from the vector search.
    pub top_k: usize,
    /// Minimum cosine similarity for a vector hit.
    pub min_similarity: f64,
    /// Maximum passages returned by the keyword fallback.
    pub keyword_limit: usize,
    /// Keyword fallback only considers words longer than this many characters.
    pub min_keyword_len: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 5,
            min_similarity: 0.3,
            keyword_limit: 5,
            min_keyword_len: 3,
        }
    }
}

/// Embedding service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Embeddings endpoint URL.
    pub base_url: String,
    /// Bearer key for the embedding service.
    pub api_key: String,
    /// Embedding model name.
    pub model: String,
    /// Per-call timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.voyageai.com/v1/embeddings".to_string(),
            api_key: String::new(),
            model: "voyage-3-lite".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Generation service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Messages endpoint URL.
    pub base_url: String,
    /// API key sent in the `x-api-key` header.
    pub api_key: String,
    /// Wire protocol version header value.
    pub api_version: String,
    /// Generation model name.
    pub model: String,
    /// Token budget for the main answer.
    pub max_tokens: u32,
    /// Sampling temperature for the main answer.
    pub temperature: f32,
    /// Connect timeout for the streaming call and total timeout for
    /// non-streaming calls, in seconds.
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com/v1/messages".to_string(),
            api_key: String::new(),
            api_version: "2023-06-01".to_string(),
            model: "claude-sonnet-4-20250514".to_string(),
            max_tokens: 2000,
            temperature: 0.7,
            timeout_secs: 120,
        }
    }
}
