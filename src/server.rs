//! OpenAI-compatible chat HTTP server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/v1/chat/completions` | One grounded chat turn, JSON or SSE (`"stream": true`) |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! Tenant and user identity come from the `x-tenant-id` and `x-user-id`
//! headers, set by the authenticating proxy in front of this server.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "messages must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `unauthorized` (401), `not_found` (404),
//! `internal` (500). Internal failures never expose their cause; it is logged
//! server-side instead.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use grounded_chat_core::chat::{ChatAnswer, ChatRequest, ChatService, RequestEvent, ResponseEvent};
use grounded_chat_core::models::{ChatMessage, Role};
use grounded_chat_core::sse::{events_from_pieces, split_with_bounds};
use grounded_chat_core::ChatError;

use crate::app::build_chat_service;
use crate::config::{Config, StreamingConfig};
use crate::db;

pub const MAX_MESSAGES: usize = 50;
pub const MAX_CONTENT_CHARS: usize = 4000;

const CHAT_PATH: &str = "/v1/chat/completions";

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub chat: Arc<ChatService>,
    pub streaming: StreamingConfig,
}

/// Starts the chat server on `[server].bind`.
///
/// Runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let pool = db::connect(config).await?;
    let chat = build_chat_service(config, pool)?;
    let state = AppState {
        chat: Arc::new(chat),
        streaming: config.streaming.clone(),
    };

    let listener = TcpListener::bind(&config.server.bind).await?;
    serve(listener, state).await
}

/// Serve the router on an already bound listener.
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    info!(addr = %listener.local_addr()?, "chat server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(CHAT_PATH, post(handle_chat_completions))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized",
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found",
        message: message.into(),
    }
}

fn internal() -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal",
        message: "internal server error".to_string(),
    }
}

/// Map a failed chat turn to a response. Only client errors keep their text.
fn classify_chat_error(err: &anyhow::Error, request_id: &str) -> AppError {
    match ChatError::find(err) {
        Some(ChatError::Validation(msg)) => bad_request(msg.clone()),
        Some(e @ ChatError::NotFound { .. }) => not_found(e.to_string()),
        _ => {
            error!(request_id, error = %format!("{:#}", err), "chat request failed");
            internal()
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /v1/chat/completions ============

#[derive(Debug, Deserialize)]
pub struct ChatCompletionRequest {
    /// The agent id.
    pub model: String,
    pub messages: Vec<IncomingMessage>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct IncomingMessage {
    pub role: String,
    pub content: String,
}

#[derive(Serialize)]
struct ChatCompletionResponse {
    id: String,
    object: &'static str,
    created: i64,
    model: String,
    choices: Vec<CompletionChoice>,
}

#[derive(Serialize)]
struct CompletionChoice {
    index: u32,
    message: AssistantMessage,
    finish_reason: &'static str,
}

#[derive(Serialize)]
struct AssistantMessage {
    role: &'static str,
    content: String,
    cited_urls: Vec<String>,
    is_rag: bool,
}

impl ChatCompletionResponse {
    fn new(answer: ChatAnswer, created: i64) -> Self {
        Self {
            id: answer.id,
            object: "chat.completion",
            created,
            model: answer.model,
            choices: vec![CompletionChoice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant",
                    content: answer.answer,
                    cited_urls: answer.cited_urls,
                    is_rag: answer.grounded,
                },
                finish_reason: "stop",
            }],
        }
    }
}

/// Validate the request body and convert its messages.
pub fn validate_request(req: &ChatCompletionRequest) -> Result<Vec<ChatMessage>, String> {
    if req.model.trim().is_empty() {
        return Err("model must not be empty".to_string());
    }
    if req.messages.is_empty() {
        return Err("messages must not be empty".to_string());
    }
    if req.messages.len() > MAX_MESSAGES {
        return Err(format!("at most {} messages are allowed", MAX_MESSAGES));
    }

    req.messages
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let role = match m.role.as_str() {
                "system" => Role::System,
                "user" => Role::User,
                "assistant" => Role::Assistant,
                other => {
                    return Err(format!(
                        "messages[{}].role must be system, user, or assistant (got '{}')",
                        i, other
                    ))
                }
            };
            if m.content.trim().is_empty() {
                return Err(format!("messages[{}].content must not be empty", i));
            }
            if m.content.chars().count() > MAX_CONTENT_CHARS {
                return Err(format!(
                    "messages[{}].content exceeds {} characters",
                    i, MAX_CONTENT_CHARS
                ));
            }
            Ok(ChatMessage {
                role,
                content: m.content.clone(),
            })
        })
        .collect()
}

fn header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

async fn handle_chat_completions(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Response {
    let started = Instant::now();
    let request_id =
        header(&headers, "x-request-id").unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let tenant_id = header(&headers, "x-tenant-id");
    let user_id = header(&headers, "x-user-id");

    let parsed = body.ok().map(|Json(b)| b);
    if let Some(logger) = state.chat.structured_logger() {
        logger.log_request(&RequestEvent {
            request_id: Some(request_id.clone()),
            method: "POST".to_string(),
            path: CHAT_PATH.to_string(),
            tenant_id: tenant_id.clone(),
            user_id: user_id.clone(),
            agent_id: parsed.as_ref().map(|b| b.model.clone()),
            stream: parsed.as_ref().is_some_and(|b| b.stream),
        });
    }

    let response = match (tenant_id, user_id) {
        (Some(tenant_id), Some(user_id)) => {
            chat_turn(&state, parsed, tenant_id, user_id, &request_id).await
        }
        _ => Err(unauthorized("missing x-tenant-id or x-user-id header")),
    }
    .unwrap_or_else(|e| e.into_response());

    if let Some(logger) = state.chat.structured_logger() {
        logger.log_response(&ResponseEvent {
            request_id: Some(request_id),
            method: "POST".to_string(),
            path: CHAT_PATH.to_string(),
            status: response.status().as_u16(),
            duration: started.elapsed(),
        });
    }
    response
}

async fn chat_turn(
    state: &AppState,
    body: Option<ChatCompletionRequest>,
    tenant_id: String,
    user_id: String,
    request_id: &str,
) -> Result<Response, AppError> {
    let body = body.ok_or_else(|| bad_request("request body must be valid JSON"))?;
    let messages = validate_request(&body).map_err(bad_request)?;

    let request = ChatRequest {
        tenant_id,
        user_id,
        agent_id: body.model.clone(),
        messages,
        request_id: Some(request_id.to_string()),
    };

    let answer = state
        .chat
        .answer(&request)
        .await
        .map_err(|e| classify_chat_error(&e, request_id))?;
    let created = chrono::Utc::now().timestamp();

    if !body.stream {
        return Ok(Json(ChatCompletionResponse::new(answer, created)).into_response());
    }

    let cfg = &state.streaming;
    let pieces = split_with_bounds(
        &answer.answer,
        cfg.chunk_size,
        cfg.min_chunk_size,
        cfg.max_chunk_size,
    );
    let events = events_from_pieces(&answer, created, pieces);
    let stream = futures::stream::iter(
        events
            .into_iter()
            .map(|e| Ok::<Event, Infallible>(Event::default().data(e.data()))),
    );

    Ok(Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response())
}
