//! HTTP server: page route, streaming chat endpoint and a small JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Usage page |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/api/indexed` | URLs in the membership set, newest first |
//! | `POST` | `/api/chat-stream` | Stream an answer as server-sent events |
//! | `GET`  | `/{*url}` | Index the encoded URL on first view, render its chat page |
//!
//! # Page route
//!
//! The path after `/` is split on `/` and each segment is percent-decoded
//! on its own, so `/https%3A%2F%2Fexample.com%2Fa` and
//! `/https%3A%2F%2Fexample.com/a` name the same page.
//!
//! | Workflow result | Response |
//! |-----------------|----------|
//! | `Indexed` / `AlreadyIndexed` | 200 chat page |
//! | `IndexingFailed` | 200 chat page with a degraded-context notice |
//! | `InvalidUrlPath` | 400 error page |
//! | `StoreUnavailable` | 503 error page |
//!
//! # Error Contract
//!
//! JSON endpoints return:
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "messages must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `store_unavailable` (503),
//! `chat_unavailable` (502), `internal` (500).
//!
//! # Chat stream events
//!
//! | Event | Data |
//! |-------|------|
//! | `delta` | `{"text": "..."}` |
//! | `error` | `{"message": "..."}` |
//! | `done` | `{}` (always last) |

use axum::{
    extract::State,
    http::{StatusCode, Uri},
    response::{
        sse::{Event, KeepAlive, KeepAliveStream, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::chat::{create_provider, new_session_id, ChatService, ChatSession};
use crate::config::Config;
use crate::error::IndexError;
use crate::models::{CanonicalUrl, ChatMessage, IndexedUrl, Role};
use crate::page::{render_chat_page, render_error_page, render_landing_page};
use crate::reconstruct::split_route_path;
use crate::workflow::{IndexStatus, IndexingWorkflow};
use crate::{db, migrate};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    workflow: IndexingWorkflow,
    chat: Arc<ChatService>,
}

impl AppState {
    pub fn new(workflow: IndexingWorkflow, chat: Arc<ChatService>) -> Self {
        Self { workflow, chat }
    }

    /// Open the database, apply migrations and wire up the configured
    /// indexer, membership store and chat provider.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_pool(&pool).await?;

        let workflow = IndexingWorkflow::local(pool.clone(), config)?;
        let provider = create_provider(&config.chat)?;
        let chat = ChatService::new(pool, provider, config.retrieval.final_limit);
        Ok(Self::new(workflow, Arc::new(chat)))
    }
}

/// Build the router with CORS and request tracing layers applied.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_landing))
        .route("/health", get(handle_health))
        .route("/favicon.ico", get(handle_favicon))
        .route("/api/indexed", get(handle_list_indexed))
        .route("/api/chat-stream", post(handle_chat_stream))
        .route("/{*url}", get(handle_page))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let state = AppState::from_config(config).await?;
    if config.chat.is_enabled() {
        tracing::info!(
            provider = %config.chat.provider,
            model = %state.chat.provider().model_name(),
            "chat provider ready"
        );
    } else {
        tracing::warn!("chat provider disabled; pages are indexed but chat requests will fail");
    }

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!("pagechat listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
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

/// Internal error type that converts into a JSON HTTP response.
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

fn chat_unavailable(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_GATEWAY,
        code: "chat_unavailable",
        message: message.into(),
    }
}

impl From<IndexError> for AppError {
    fn from(err: IndexError) -> Self {
        let status = match err {
            IndexError::InvalidUrlPath(_) => StatusCode::BAD_REQUEST,
            IndexError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            IndexError::IndexingFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let code = match err {
            IndexError::IndexingFailed { .. } => "internal",
            _ => err.code(),
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

// ============ GET / and /health ============

async fn handle_landing() -> Html<String> {
    Html(render_landing_page())
}

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

async fn handle_favicon() -> StatusCode {
    StatusCode::NO_CONTENT
}

// ============ GET /api/indexed ============

#[derive(Serialize)]
struct IndexedResponse {
    urls: Vec<IndexedUrl>,
}

async fn handle_list_indexed(
    State(state): State<AppState>,
) -> Result<Json<IndexedResponse>, AppError> {
    let urls = state.workflow.store().list().await?;
    Ok(Json(IndexedResponse { urls }))
}

// ============ GET /{*url} ============

/// Handler for the catch-all page route.
///
/// Reads the raw (still encoded) path from the request URI rather than the
/// matched wildcard, which axum has already percent-decoded as a whole.
async fn handle_page(State(state): State<AppState>, uri: Uri) -> Response {
    let segments = split_route_path(uri.path());
    let session_id = new_session_id();

    match state.workflow.ensure_indexed(Some(segments.as_slice())).await {
        Ok(outcome) => {
            if let IndexStatus::Indexed { chunks } = outcome.status {
                tracing::info!(url = %outcome.url, chunks, "first view indexed");
            }
            Html(render_chat_page(&outcome.url, &session_id, None)).into_response()
        }
        Err(IndexError::IndexingFailed { url, message }) => {
            Html(render_chat_page(&url, &session_id, Some(&message))).into_response()
        }
        Err(err @ IndexError::InvalidUrlPath(_)) => {
            tracing::debug!(path = uri.path(), error = %err, "rejected page path");
            error_page(StatusCode::BAD_REQUEST, &err.to_string())
        }
        Err(err @ IndexError::StoreUnavailable(_)) => {
            tracing::error!(error = %err, "membership store unavailable");
            error_page(
                StatusCode::SERVICE_UNAVAILABLE,
                "The index is temporarily unavailable. Please try again shortly.",
            )
        }
    }
}

fn error_page(status: StatusCode, message: &str) -> Response {
    (status, Html(render_error_page(status.as_u16(), message))).into_response()
}

// ============ POST /api/chat-stream ============

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatStreamRequest {
    #[serde(default)]
    session_id: Option<String>,
    url: String,
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

type EventStream = BoxStream<'static, Result<Event, Infallible>>;

/// Handler for `POST /api/chat-stream`.
///
/// Validation and provider start-up failures are returned as JSON errors
/// before the stream opens. Failures after that point arrive as an `error`
/// event followed by `done`.
async fn handle_chat_stream(
    State(state): State<AppState>,
    Json(req): Json<ChatStreamRequest>,
) -> Result<Sse<KeepAliveStream<EventStream>>, AppError> {
    let session_id = req
        .session_id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| bad_request("sessionId must not be empty"))?;
    if req.url.trim().is_empty() {
        return Err(bad_request("url must not be empty"));
    }
    if req.messages.is_empty() {
        return Err(bad_request("messages must not be empty"));
    }
    if !req.messages.iter().any(|m| m.role == Role::User) {
        return Err(bad_request("messages must include a user message"));
    }

    let session = ChatSession::new(session_id, CanonicalUrl::new(req.url));
    let deltas = state
        .chat
        .reply(&session, &req.messages)
        .await
        .map_err(|e| {
            tracing::warn!(session = %session.session_id, error = %format!("{:#}", e), "chat failed");
            chat_unavailable(format!("{:#}", e))
        })?;

    let events = deltas
        .map(|item| match item {
            Ok(text) => Event::default()
                .event("delta")
                .data(serde_json::json!({ "text": text }).to_string()),
            Err(err) => Event::default()
                .event("error")
                .data(serde_json::json!({ "message": format!("{:#}", err) }).to_string()),
        })
        .chain(stream::once(async { Event::default().event("done").data("{}") }))
        .map(Ok::<_, Infallible>)
        .boxed();

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
