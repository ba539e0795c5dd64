//! Route handler functions.
//!
//! The chat handler validates the inbound JSON, runs the pipeline's
//! pre-stream stages (any failure there still gets a synchronous HTTP
//! status), then bridges the pipeline's event channel into the SSE response.
//! After the first byte of the stream, the HTTP status never changes;
//! failures arrive as in-band `error` events.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use uuid::Uuid;

use canon_chat::{ChatEvent, TurnRequest};

use crate::error::ApiError;
use crate::state::AppState;

/// Request body for POST /chat.
#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub message: Option<String>,
    pub client_slug: Option<String>,
    pub conversation_id: Option<Uuid>,
}

/// Response for GET /health.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// POST /chat - run one conversational turn, streaming the answer as SSE.
pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatBody>,
) -> Result<Response, ApiError> {
    let message = body.message.unwrap_or_default();
    if message.trim().is_empty() {
        return Err(ApiError::BadRequest("message is required".to_string()));
    }

    let rx = state
        .pipeline
        .handle(TurnRequest {
            message,
            client_slug: body.client_slug,
            conversation_id: body.conversation_id,
        })
        .await
        .map_err(ApiError::from)?;

    let stream =
        ReceiverStream::new(rx).map(|event| Ok::<Event, Infallible>(to_sse_event(event)));
    let sse = Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)));

    Ok(([(header::CACHE_CONTROL, "no-cache")], sse).into_response())
}

/// GET /health - liveness probe.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Re-frame a pipeline event into the outbound wire protocol.
fn to_sse_event(event: ChatEvent) -> Event {
    match event {
        ChatEvent::Delta { text } => Event::default()
            .event("delta")
            .data(serde_json::json!({ "text": text }).to_string()),
        ChatEvent::Sources {
            sources,
            conversation_id,
        } => Event::default().event("sources").data(
            serde_json::json!({
                "sources": sources,
                "conversation_id": conversation_id,
            })
            .to_string(),
        ),
        ChatEvent::Error { error } => Event::default()
            .event("error")
            .data(serde_json::json!({ "error": error }).to_string()),
        ChatEvent::Done => Event::default().event("done").data("[DONE]"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use chrono::Utc;
    use tower::ServiceExt;

    use canon_chat::{ChatPipeline, CueDetector, QueryRewriter};
    use canon_core::config::CanonConfig;
    use canon_core::types::{Client, Passage, Role};
    use canon_llm::mock::{MockEmbedder, MockGenerator};
    use canon_llm::{Embedder, Generator};
    use canon_retrieval::{PassageIndex, RetrievalEngine};
    use canon_storage::{
        ClientStore, ConversationStore, Database, MessageStore, PassageStore,
    };

    struct TestApp {
        router: Router,
        client: Client,
        conversations: ConversationStore,
        messages: MessageStore,
        passages: PassageStore,
        index: Arc<PassageIndex>,
    }

    fn make_app(generator: MockGenerator) -> TestApp {
        make_app_with(generator, MockEmbedder::new(), "")
    }

    fn make_app_with(
        generator: MockGenerator,
        embedder: MockEmbedder,
        api_key: &str,
    ) -> TestApp {
        let db = Arc::new(Database::in_memory().unwrap());
        let clients = ClientStore::new(Arc::clone(&db));
        let conversations = ConversationStore::new(Arc::clone(&db));
        let messages = MessageStore::new(Arc::clone(&db));
        let passages = PassageStore::new(Arc::clone(&db));

        // Matches the default_client_slug in the default config.
        let client = Client {
            id: uuid::Uuid::new_v4(),
            slug: "persona".to_string(),
            display_name: "Persona".to_string(),
            persona_prompt: None,
            created_at: Utc::now(),
        };
        clients.insert(&client).unwrap();

        let config = CanonConfig::default();
        let embedder = Arc::new(embedder);
        let generator = Arc::new(generator);
        let index = Arc::new(PassageIndex::new());

        let retrieval = Arc::new(RetrievalEngine::new(
            Arc::clone(&embedder) as Arc<dyn Embedder>,
            Arc::clone(&index),
            passages.clone(),
            config.retrieval.clone(),
        ));
        let rewriter = QueryRewriter::new(
            Arc::clone(&generator) as Arc<dyn Generator>,
            Box::new(CueDetector::new(config.rewrite.max_message_len).unwrap()),
            config.rewrite.clone(),
        );
        let pipeline = ChatPipeline::new(
            clients,
            conversations.clone(),
            messages.clone(),
            retrieval,
            rewriter,
            Arc::clone(&generator) as Arc<dyn Generator>,
            "KNOWLEDGE DOCUMENT".to_string(),
            config,
        );

        let state = AppState::new(Arc::new(pipeline), api_key.to_string());
        TestApp {
            router: crate::routes::create_router(state),
            client,
            conversations,
            messages,
            passages,
            index,
        }
    }

    fn seed_passage(app: &TestApp, text: &str, title: &str, source_type: &str, embedding: Vec<f32>) {
        let passage = Passage {
            id: uuid::Uuid::new_v4(),
            client_id: app.client.id,
            text: text.to_string(),
            source_title: title.to_string(),
            source_url: Some("https://example.com/post".to_string()),
            source_type: source_type.to_string(),
            published_at: None,
            embedding,
        };
        app.passages.insert(&passage).unwrap();
        app.index.insert_passage(&passage).unwrap();
    }

    async fn post_chat(router: Router, body: serde_json::Value) -> axum::response::Response {
        router
            .oneshot(
                Request::post("/chat")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        String::from_utf8_lossy(&bytes).to_string()
    }

    /// Parse an SSE body into (event, data) pairs.
    fn parse_sse(body: &str) -> Vec<(String, String)> {
        let mut events = Vec::new();
        let mut event = String::new();
        let mut data = String::new();
        for line in body.lines() {
            if let Some(rest) = line.strip_prefix("event: ") {
                event = rest.to_string();
            } else if let Some(rest) = line.strip_prefix("data: ") {
                data = rest.to_string();
            } else if line.is_empty() && !event.is_empty() {
                events.push((event.clone(), data.clone()));
                event.clear();
                data.clear();
            }
        }
        events
    }

    // ---- Validation ----

    #[tokio::test]
    async fn test_missing_message_returns_400() {
        let app = make_app(MockGenerator::answering(&["x"]));
        let response = post_chat(app.router, serde_json::json!({})).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_string(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("message"));
    }

    #[tokio::test]
    async fn test_empty_message_returns_400() {
        let app = make_app(MockGenerator::answering(&["x"]));
        let response = post_chat(app.router, serde_json::json!({"message": "  "})).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unknown_client_returns_404() {
        let app = make_app(MockGenerator::answering(&["x"]));
        let response = post_chat(
            app.router,
            serde_json::json!({"message": "hello", "client_slug": "nobody"}),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_string(response).await;
        assert!(body.contains("error"));
    }

    // ---- Scenario C: pre-stream upstream failure ----

    #[tokio::test]
    async fn test_embedding_failure_returns_500_without_stream() {
        let app = make_app_with(
            MockGenerator::answering(&["x"]),
            MockEmbedder::failing(),
            "",
        );
        let response = post_chat(app.router, serde_json::json!({"message": "hello"})).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("application/json"));
        let body = body_string(response).await;
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("Embedding"));
    }

    #[tokio::test]
    async fn test_generation_open_failure_returns_500() {
        let app = make_app(MockGenerator::failing_to_open());
        let response = post_chat(app.router, serde_json::json!({"message": "hello"})).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    // ---- Scenario A: fresh conversation with retrieval ----

    #[tokio::test]
    async fn test_chat_streams_deltas_sources_done() {
        let app = make_app(MockGenerator::answering(&["Beeghee is ", "bee bread."]));
        let query = "What is BEEGHEE?";
        seed_passage(
            &app,
            "Beeghee is the world's first hive-fermented superfood",
            "Introducing Beeghee",
            "article",
            MockEmbedder::vector_for(query),
        );

        let response = post_chat(app.router.clone(), serde_json::json!({"message": query})).await;
        assert_eq!(response.status(), StatusCode::OK);

        let content_type = response
            .headers()
            .get("content-type")
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(content_type.starts_with("text/event-stream"));
        assert_eq!(response.headers().get("cache-control").unwrap(), "no-cache");

        let body = body_string(response).await;
        let events = parse_sse(&body);

        assert_eq!(events[0].0, "delta");
        assert_eq!(events[1].0, "delta");
        assert_eq!(events[2].0, "sources");
        assert_eq!(events[3], ("done".to_string(), "[DONE]".to_string()));

        let sources: serde_json::Value = serde_json::from_str(&events[2].1).unwrap();
        assert_eq!(sources["sources"][0]["type"], "article");
        assert_eq!(sources["sources"][0]["title"], "Introducing Beeghee");
        assert!(sources["sources"][0]["similarity"].as_f64().unwrap() > 0.9);

        // A fresh conversation was created and its id delivered here.
        let conversation_id = sources["conversation_id"].as_str().unwrap();
        let conversation_id = uuid::Uuid::parse_str(conversation_id).unwrap();
        assert!(app
            .conversations
            .find_by_id(conversation_id)
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_delta_round_trip_matches_persisted_answer() {
        let app = make_app(MockGenerator::answering(&["alpha ", "beta ", "gamma"]));
        let response = post_chat(app.router.clone(), serde_json::json!({"message": "hi"})).await;
        let body = body_string(response).await;
        let events = parse_sse(&body);

        let streamed: String = events
            .iter()
            .filter(|(event, _)| event == "delta")
            .map(|(_, data)| {
                let json: serde_json::Value = serde_json::from_str(data).unwrap();
                json["text"].as_str().unwrap().to_string()
            })
            .collect();

        let sources: serde_json::Value = serde_json::from_str(
            &events
                .iter()
                .find(|(event, _)| event == "sources")
                .unwrap()
                .1,
        )
        .unwrap();
        let conversation_id =
            uuid::Uuid::parse_str(sources["conversation_id"].as_str().unwrap()).unwrap();

        let history = app.messages.load_history(conversation_id, 40).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].role, Role::Assistant);
        assert_eq!(history[1].content, streamed);
        assert_eq!(streamed, "alpha beta gamma");
    }

    #[tokio::test]
    async fn test_supplied_conversation_id_echoed_in_sources() {
        let app = make_app(MockGenerator::answering(&["hi"]));
        let conversation = app.conversations.create(app.client.id).unwrap();

        let response = post_chat(
            app.router.clone(),
            serde_json::json!({
                "message": "hello again",
                "conversation_id": conversation.id,
            }),
        )
        .await;
        let body = body_string(response).await;
        let events = parse_sse(&body);

        let sources: serde_json::Value = serde_json::from_str(
            &events
                .iter()
                .find(|(event, _)| event == "sources")
                .unwrap()
                .1,
        )
        .unwrap();
        assert_eq!(
            sources["conversation_id"].as_str().unwrap(),
            conversation.id.to_string()
        );
    }

    // ---- Mid-stream failure surfaces in-band ----

    #[tokio::test]
    async fn test_mid_stream_error_event() {
        let app = make_app(MockGenerator::with_fragments(vec![
            Ok("partial".to_string()),
            Err("upstream reset".to_string()),
        ]));
        let response = post_chat(app.router, serde_json::json!({"message": "hello"})).await;
        // The stream opened successfully; the failure is in-band.
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_string(response).await;
        let events = parse_sse(&body);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].0, "delta");
        assert_eq!(events[1].0, "error");
        let error: serde_json::Value = serde_json::from_str(&events[1].1).unwrap();
        assert!(error["error"].as_str().unwrap().contains("upstream reset"));
        assert!(!events.iter().any(|(event, _)| event == "done"));
    }

    // ---- Health and auth ----

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = make_app(MockGenerator::answering(&["x"]));
        let response = app
            .router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_string(response).await;
        let health: HealthResponse = serde_json::from_str(&body).unwrap();
        assert_eq!(health.status, "ok");
    }

    #[tokio::test]
    async fn test_chat_requires_api_key_when_configured() {
        let app = make_app_with(
            MockGenerator::answering(&["x"]),
            MockEmbedder::new(),
            "secret-key",
        );
        let response = post_chat(app.router, serde_json::json!({"message": "hello"})).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_chat_accepts_valid_api_key() {
        let app = make_app_with(
            MockGenerator::answering(&["x"]),
            MockEmbedder::new(),
            "secret-key",
        );
        let response = app
            .router
            .oneshot(
                Request::post("/chat")
                    .header("content-type", "application/json")
                    .header("authorization", "Bearer secret-key")
                    .body(Body::from(
                        serde_json::json!({"message": "hello"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_health_public_even_with_api_key() {
        let app = make_app_with(
            MockGenerator::answering(&["x"]),
            MockEmbedder::new(),
            "secret-key",
        );
        let response = app
            .router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_chat_rejects_wrong_api_key() {
        let app = make_app_with(
            MockGenerator::answering(&["x"]),
            MockEmbedder::new(),
            "secret-key",
        );
        let response = app
            .router
            .oneshot(
                Request::post("/chat")
                    .header("content-type", "application/json")
                    .header("authorization", "Bearer wrong")
                    .body(Body::from(
                        serde_json::json!({"message": "hello"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // ---- Keyword fallback visible in the wire format ----

    #[tokio::test]
    async fn test_keyword_matched_source_has_zero_similarity() {
        let app = make_app(MockGenerator::answering(&["answer"]));
        let query = "whitewater riverboarding";
        // Embedding far from the query vector: only the keyword path matches.
        let far: Vec<f32> = MockEmbedder::vector_for(query).iter().map(|v| -v).collect();
        seed_passage(&app, "notes on whitewater descents", "River Notes", "article", far);

        let response = post_chat(app.router, serde_json::json!({"message": query})).await;
        let body = body_string(response).await;
        let events = parse_sse(&body);

        let sources: serde_json::Value = serde_json::from_str(
            &events
                .iter()
                .find(|(event, _)| event == "sources")
                .unwrap()
                .1,
        )
        .unwrap();
        assert_eq!(sources["sources"][0]["similarity"], 0.0);
    }
}
