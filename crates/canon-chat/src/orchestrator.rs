//! The streaming orchestrator: one inbound message to one outbound event
//! stream, with durable persistence of the exchange.
//!
//! Stages before the upstream stream opens run sequentially and fail the
//! request synchronously (the API layer still controls the HTTP status).
//! Once streaming starts, every failure is reported in-band as a single
//! `Error` event. The user message is durably persisted before any model
//! call; the assistant message is persisted only after the full answer has
//! been accumulated.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use canon_core::config::CanonConfig;
use canon_core::error::{CanonError, Result};
use canon_core::types::{Conversation, Role, Source};
use canon_llm::{Generator, TokenStream};
use canon_retrieval::RetrievalEngine;
use canon_storage::{ClientStore, ConversationStore, MessageStore};

use crate::context;
use crate::rewrite::QueryRewriter;

/// Outbound event stream capacity. The relay blocks once the consumer falls
/// this far behind, which bounds memory for slow readers.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// One inbound chat request.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub message: String,
    pub client_slug: Option<String>,
    pub conversation_id: Option<Uuid>,
}

/// Outbound event, re-framed by the API layer into the wire protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// One generated text fragment.
    Delta { text: String },
    /// Citations plus the effective conversation id; success path only,
    /// exactly once, after generation ends.
    Sources {
        sources: Vec<Source>,
        conversation_id: Uuid,
    },
    /// Terminal failure report; at most once, in place of Sources/Done.
    Error { error: String },
    /// Terminal marker; success path only.
    Done,
}

/// The conversational pipeline.
///
/// One `handle` call runs one request; all cross-request state lives in the
/// stores.
pub struct ChatPipeline {
    clients: ClientStore,
    conversations: ConversationStore,
    messages: MessageStore,
    retrieval: Arc<RetrievalEngine>,
    rewriter: QueryRewriter,
    generator: Arc<dyn Generator>,
    knowledge_document: String,
    config: CanonConfig,
}

impl ChatPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clients: ClientStore,
        conversations: ConversationStore,
        messages: MessageStore,
        retrieval: Arc<RetrievalEngine>,
        rewriter: QueryRewriter,
        generator: Arc<dyn Generator>,
        knowledge_document: String,
        config: CanonConfig,
    ) -> Self {
        Self {
            clients,
            conversations,
            messages,
            retrieval,
            rewriter,
            generator,
            knowledge_document,
            config,
        }
    }

    /// Run the pre-stream stages and open the outbound event stream.
    ///
    /// Any error returned here happened before the first outbound byte; the
    /// caller may still answer with a synchronous HTTP status. After this
    /// returns Ok, all failures surface as an in-band `Error` event.
    pub async fn handle(&self, request: TurnRequest) -> Result<mpsc::Receiver<ChatEvent>> {
        if request.message.trim().is_empty() {
            return Err(CanonError::Validation("message is required".to_string()));
        }

        let slug = request
            .client_slug
            .as_deref()
            .unwrap_or(&self.config.persona.default_client_slug);
        let client = self
            .clients
            .find_by_slug(slug)?
            .ok_or_else(|| CanonError::ClientNotFound(slug.to_string()))?;

        let conversation = self.resolve_conversation(request.conversation_id, client.id)?;

        // Durably persist the user message before any model call: a crash
        // beyond this point never loses the caller's input, and a failed
        // write aborts the request before any billing happens.
        self.messages
            .append(conversation.id, client.id, Role::User, &request.message)?;

        let history = self
            .messages
            .load_history(conversation.id, self.config.chat.history_limit)?;

        let search_query = self.rewriter.rewrite(&request.message, &history).await;
        let passages = self.retrieval.retrieve(client.id, &search_query).await?;
        let sources: Vec<Source> = passages.iter().map(|p| p.to_source()).collect();

        let document = client
            .persona_prompt
            .as_deref()
            .unwrap_or(&self.knowledge_document);
        let prior = &history[..history.len().saturating_sub(1)];
        let generation_request = context::build_request(
            document,
            prior,
            &request.message,
            &passages,
            &self.config.generation,
        );

        let upstream = self.generator.stream(&generation_request).await?;

        info!(
            client = %client.slug,
            conversation_id = %conversation.id,
            passages = passages.len(),
            "Streaming answer"
        );

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let relay = Relay {
            messages: self.messages.clone(),
            conversations: self.conversations.clone(),
            conversation_id: conversation.id,
            client_id: client.id,
            sources,
            message_count: history.len() as u32 + 1,
        };
        tokio::spawn(relay.run(upstream, tx));

        Ok(rx)
    }

    /// Resolve a supplied conversation id or create a fresh conversation.
    ///
    /// A supplied id that is unknown or owned by a different client is
    /// treated as unknown; the caller learns the effective id from the
    /// `sources` event.
    fn resolve_conversation(
        &self,
        requested: Option<Uuid>,
        client_id: Uuid,
    ) -> Result<Conversation> {
        if let Some(id) = requested {
            if let Some(conversation) = self.conversations.find_by_id(id)? {
                if conversation.client_id == client_id {
                    return Ok(conversation);
                }
                warn!(
                    conversation_id = %id,
                    "Supplied conversation belongs to a different client; starting a new one"
                );
            }
        }
        self.conversations.create(client_id)
    }
}

/// State carried into the spawned relay task.
struct Relay {
    messages: MessageStore,
    conversations: ConversationStore,
    conversation_id: Uuid,
    client_id: Uuid,
    sources: Vec<Source>,
    message_count: u32,
}

impl Relay {
    /// Pump upstream fragments into the outbound channel, then persist and
    /// emit the closing events.
    ///
    /// A failed send means the receiver (and with it the caller) is gone:
    /// stop relaying and drop the upstream stream to release its connection.
    async fn run(self, mut upstream: Box<dyn TokenStream>, tx: mpsc::Sender<ChatEvent>) {
        let mut answer = String::new();

        loop {
            match upstream.next_fragment().await {
                Some(Ok(text)) => {
                    answer.push_str(&text);
                    if tx.send(ChatEvent::Delta { text }).await.is_err() {
                        info!(
                            conversation_id = %self.conversation_id,
                            "Caller disconnected mid-stream; dropping upstream"
                        );
                        return;
                    }
                }
                Some(Err(e)) => {
                    // No partial persistence: a persisted assistant turn
                    // always corresponds to a completed generation.
                    warn!(error = %e, "Generation interrupted mid-stream");
                    let _ = tx
                        .send(ChatEvent::Error {
                            error: e.to_string(),
                        })
                        .await;
                    return;
                }
                None => break,
            }
        }

        if !answer.is_empty() {
            if let Err(e) =
                self.messages
                    .append(self.conversation_id, self.client_id, Role::Assistant, &answer)
            {
                warn!(error = %e, "Failed to persist assistant message");
                let _ = tx
                    .send(ChatEvent::Error {
                        error: e.to_string(),
                    })
                    .await;
                return;
            }

            // Best-effort metadata update; never fails the turn.
            if let Err(e) = self
                .conversations
                .touch(self.conversation_id, self.message_count)
            {
                warn!(error = %e, "Failed to touch conversation metadata");
            }
        }

        let _ = tx
            .send(ChatEvent::Sources {
                sources: self.sources,
                conversation_id: self.conversation_id,
            })
            .await;
        let _ = tx.send(ChatEvent::Done).await;
    }
}
