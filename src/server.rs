//! HTTP chat API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Health check |
//! | `GET`  | `/health` | Health check with crate version |
//! | `POST` | `/api/chat` | `{"query": "..."}` → `{"answer": "..."}` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": "Query parameter is required" }
//! ```
//!
//! A missing or blank query is a 400. A failure of the answer assembler is
//! a 500 carrying its message. Retrieval problems never surface here; the
//! retrieval service degrades to the fallback context instead.
//!
//! # CORS
//!
//! Allowed origins are the configured `[server].allowed_origins`, the
//! `https://` variant of each `http://` entry, and the local development
//! origins `http://localhost:3000` and `http://127.0.0.1:3000`.

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::answer::{create_assembler, AnswerAssembler, PromptProfile};
use crate::config::Config;
use crate::embedding::create_embedder;
use crate::retriever::{RetrievalOptions, RetrievalService};

const DEV_ORIGINS: &[&str] = &["http://localhost:3000", "http://127.0.0.1:3000"];

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub retriever: Arc<RetrievalService>,
    pub assembler: Arc<dyn AnswerAssembler>,
    pub subject: String,
}

/// Starts the chat server on `[server].bind`.
///
/// Loads the index once; the server runs until the process is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let embedder = create_embedder(&config.embedding)?;
    let retriever = RetrievalService::load(
        &config.storage.root,
        embedder,
        RetrievalOptions::from_config(config),
    )
    .await?;
    let state = AppState {
        retriever: Arc::new(retriever),
        assembler: create_assembler(config)?,
        subject: PromptProfile::from_config(config).subject().to_string(),
    };

    let app = router(state, &config.server.allowed_origins);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    tracing::info!(bind = %config.server.bind, "chat server listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the router with CORS for `allowed_origins`.
pub fn router(state: AppState, allowed_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = cors_origins(allowed_origins)
        .into_iter()
        .filter_map(|origin| match HeaderValue::from_str(&origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/api/chat", post(handle_chat))
        .layer(cors)
        .with_state(state)
}

/// Configured origins plus their `https://` variants and the dev origins, deduplicated.
pub fn cors_origins(configured: &[String]) -> Vec<String> {
    let mut origins: Vec<String> = Vec::new();
    let mut push = |origin: String| {
        if !origin.is_empty() && !origins.contains(&origin) {
            origins.push(origin);
        }
    };
    for origin in configured {
        let origin = origin.trim().trim_end_matches('/').to_string();
        if let Some(rest) = origin.strip_prefix("http://") {
            let secure = format!("https://{}", rest);
            push(origin);
            push(secure);
        } else {
            push(origin);
        }
    }
    for origin in DEV_ORIGINS {
        push(origin.to_string());
    }
    origins
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        message: message.into(),
    }
}

// ============ GET / and /health ============

#[derive(Serialize)]
struct RootResponse {
    status: &'static str,
    message: String,
}

async fn handle_root(State(state): State<AppState>) -> Json<RootResponse> {
    Json(RootResponse {
        status: "healthy",
        message: format!("{} portfolio chatbot API is running", state.subject),
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    index: &'static str,
    chunks: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        index: match state.retriever.status() {
            crate::retriever::IndexStatus::Ready => "ready",
            crate::retriever::IndexStatus::Unbuilt => "unbuilt",
        },
        chunks: state.retriever.len(),
    })
}

// ============ POST /api/chat ============

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(default)]
    query: Option<String>,
}

#[derive(Serialize)]
struct ChatResponse {
    answer: String,
}

async fn handle_chat(State(state): State<AppState>, body: Bytes) -> Result<Json<ChatResponse>, AppError> {
    // Malformed bodies get the same answer as a missing query.
    let query = serde_json::from_slice::<ChatRequest>(&body)
        .ok()
        .and_then(|req| req.query)
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| bad_request("Query parameter is required"))?;

    let k = state.retriever.options().k;
    let context = state.retriever.context(&query, k).await;

    let answer = state
        .assembler
        .answer(&query, &context)
        .await
        .map_err(|e| {
            tracing::error!(error = %format!("{:#}", e), "answer assembly failed");
            internal(e.to_string())
        })?;

    Ok(Json(ChatResponse { answer }))
}
