use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chatrelay::{
    CancellationToken, ImageOptions, Mode, ProviderStatus, RelayClient, RelayError, Usage,
    apology,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub client: Arc<RelayClient>,
    /// Cancelled on shutdown; each request runs under a child token.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(client: RelayClient) -> Self {
        Self {
            client: Arc::new(client),
            shutdown: CancellationToken::new(),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/chat", post(chat))
        .route("/v1/images", post(images))
        .route("/v1/providers", get(list_providers))
        .route("/v1/providers/reset", post(reset_providers))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub async fn run_server(client: RelayClient, host: &str, port: u16) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(client));
    let shutdown = state.shutdown.clone();
    let app = router(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("chat relay listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested; cancelling in-flight requests");
            }
            shutdown.cancel();
        })
        .await?;

    Ok(())
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({"error": {"message": message.into()}}))).into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

// ---------------------------------------------------------------------------
// POST /v1/chat
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub mode: String,
    pub prompt: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub failed: bool,
}

async fn chat(State(state): State<Arc<AppState>>, Json(req): Json<ChatRequest>) -> Response {
    let mode: Mode = match req.mode.parse() {
        Ok(mode) => mode,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };
    if req.prompt.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "prompt must not be empty");
    }

    let cancel = state.shutdown.child_token();
    let result = state
        .client
        .generate_text(mode, &req.prompt, req.system_prompt.as_deref(), &cancel)
        .await;

    match result {
        Ok(resp) => Json(ChatReply {
            reply: resp.text,
            provider: Some(resp.provider),
            model: Some(resp.model),
            usage: resp.usage,
            failed: false,
        })
        .into_response(),
        Err(RelayError::NotTextMode(mode)) => error_response(
            StatusCode::BAD_REQUEST,
            format!("{} requests go to /v1/images", mode),
        ),
        Err(e) => {
            tracing::warn!(error = %e, mode = %mode, "chat request failed");
            Json(ChatReply {
                reply: apology::user_message(&e),
                provider: e.last_error().map(|last| last.provider.clone()),
                model: None,
                usage: None,
                failed: true,
            })
            .into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// POST /v1/images
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ImageRequest {
    pub prompt: String,
    #[serde(flatten)]
    pub options: ImageOptions,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImageReply {
    pub reply: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub failed: bool,
}

async fn images(State(state): State<Arc<AppState>>, Json(req): Json<ImageRequest>) -> Response {
    if req.prompt.trim().is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "prompt must not be empty");
    }

    let cancel = state.shutdown.child_token();
    match state.client.generate_image(&req.prompt, &req.options, &cancel).await {
        Ok(url) => Json(ImageReply {
            reply: url.clone(),
            url: Some(url),
            failed: false,
        })
        .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "image request failed");
            Json(ImageReply {
                reply: apology::user_message(&e),
                url: None,
                failed: true,
            })
            .into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Provider status
// ---------------------------------------------------------------------------

async fn list_providers(State(state): State<Arc<AppState>>) -> Json<Vec<ProviderStatus>> {
    Json(state.client.provider_status(false).await)
}

async fn reset_providers(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state.client.reset_all_providers();
    Json(json!({"reset": true}))
}
