//! canon application binary - composition root.
//!
//! Ties together all canon crates into a single executable:
//! 1. Load configuration from TOML
//! 2. Open storage (SQLite) and warm the passage vector index
//! 3. Build the upstream clients (embedding + generation)
//! 4. Load the knowledge document
//! 5. Start the axum HTTP server

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use canon_api::{routes, AppState};
use canon_chat::{ChatPipeline, CueDetector, QueryRewriter};
use canon_core::config::CanonConfig;
use canon_core::error::{CanonError, Result};
use canon_llm::{Embedder, Generator, HttpEmbedder, HttpGenerator};
use canon_retrieval::{PassageIndex, RetrievalEngine};
use canon_storage::{ClientStore, ConversationStore, Database, MessageStore, PassageStore};

/// Conversational retrieval service over one person's published work.
#[derive(Debug, Parser)]
#[command(name = "canon", version)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long, default_value = "canon.toml")]
    config: PathBuf,

    /// Override the configured server port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = CanonConfig::load_or_default(&cli.config);
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.server.log_filter.clone().into()),
        )
        .init();

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "canon failed to start");
        std::process::exit(1);
    }
}

async fn run(config: CanonConfig) -> Result<()> {
    let db = Arc::new(Database::new(std::path::Path::new(&config.storage.db_path))?);

    let clients = ClientStore::new(Arc::clone(&db));
    let conversations = ConversationStore::new(Arc::clone(&db));
    let messages = MessageStore::new(Arc::clone(&db));
    let passages = PassageStore::new(Arc::clone(&db));

    // Warm the in-memory vector index from the pre-embedded archive.
    let index = Arc::new(PassageIndex::new());
    let archive = passages.all()?;
    for passage in &archive {
        index.insert_passage(passage)?;
    }
    tracing::info!(passages = archive.len(), "Passage index warmed");

    let knowledge_document = load_knowledge_document(&config)?;

    let embedder: Arc<dyn Embedder> = Arc::new(HttpEmbedder::new(config.embedding.clone())?);
    let generator: Arc<dyn Generator> = Arc::new(HttpGenerator::new(config.generation.clone())?);

    let retrieval = Arc::new(RetrievalEngine::new(
        embedder,
        index,
        passages,
        config.retrieval.clone(),
    ));
    let rewriter = QueryRewriter::new(
        Arc::clone(&generator),
        Box::new(CueDetector::new(config.rewrite.max_message_len)?),
        config.rewrite.clone(),
    );

    let pipeline = ChatPipeline::new(
        clients,
        conversations,
        messages,
        retrieval,
        rewriter,
        generator,
        knowledge_document,
        config.clone(),
    );

    let state = AppState::new(Arc::new(pipeline), config.server.api_key.clone());
    routes::start_server(&config, state).await
}

/// Load the static knowledge document named in the configuration.
///
/// An empty path is allowed (per-client persona prompts may carry the whole
/// document); a configured path that cannot be read is fatal.
fn load_knowledge_document(config: &CanonConfig) -> Result<String> {
    let path = &config.persona.knowledge_document_path;
    if path.is_empty() {
        tracing::warn!("No knowledge document configured; relying on per-client persona prompts");
        return Ok(String::new());
    }

    let document = std::fs::read_to_string(path).map_err(|e| {
        CanonError::Config(format!("Failed to read knowledge document {}: {}", path, e))
    })?;
    tracing::info!(path, bytes = document.len(), "Knowledge document loaded");
    Ok(document)
}
