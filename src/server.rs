//! HTTP gateway for the context daemon.
//!
//! Every request triggers a fresh aggregation pass over the project's
//! filesystem; nothing is cached between requests.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `OPTIONS` | any | no | CORS preflight, `200` with empty body |
//! | `GET`  | `/health` | no | `{status, port, pid, version}` |
//! | `GET`  | `/api/context/status` | yes | source presence and item count |
//! | `POST` | `/api/context` | yes | full envelope, ranked if `query` is given |
//! | `POST` | `/api/context/search` | yes | ranked envelope, `query` required |
//!
//! Any other path answers `404` with a JSON error body.
//!
//! # Error Contract
//!
//! ```json
//! { "error": "query is required", "code": "bad_request" }
//! ```
//!
//! Authentication failures add `suggestion` and `tokenFile` hints.
//!
//! `/health` never touches the auth gate or the aggregator, so the supervisor
//! can tell a wedged daemon from a working one.

use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{header::AUTHORIZATION, Method, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{self, AuthDecision};
use crate::config::Config;
use crate::context::{self, ContextRequest};
use crate::models::{SourcePresence, UnifiedContext};
use crate::state::DaemonPaths;
use crate::traits::ReaderSet;

/// Default `maxItems` for `POST /api/context/search`.
const DEFAULT_SEARCH_ITEMS: usize = 20;

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    root: Arc<PathBuf>,
    readers: Arc<ReaderSet>,
    token_file: Arc<PathBuf>,
    port: u16,
}

/// Builds the gateway router for the project at `root`.
///
/// `port` is only reported by `/health`; binding is [`run_server`]'s job.
pub fn router(root: &Path, config: &Config, port: u16) -> Router {
    let state = AppState {
        root: Arc::new(root.to_path_buf()),
        readers: Arc::new(ReaderSet::from_config(&config.sources)),
        token_file: Arc::new(DaemonPaths::new(root).token_file),
        port,
    };

    let api = Router::new()
        .route("/api/context/status", get(handle_status))
        .route("/api/context", post(handle_context))
        .route("/api/context/search", post(handle_search))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .merge(api)
        .fallback(handle_not_found)
        .layer(middleware::from_fn(answer_preflight))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Binds `host:port` and serves until SIGINT or SIGTERM.
///
/// Failing to bind is the only fatal error; it is returned so the caller can
/// exit non-zero.
pub async fn run_server(root: &Path, config: &Config, port: u16) -> anyhow::Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, port);
    let app = router(root, config, port);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, pid = std::process::id(), root = %root.display(), "context daemon listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("context daemon shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
}

// ============ Error response ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_file: Option<String>,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
    suggestion: Option<String>,
    token_file: Option<String>,
}

impl AppError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            suggestion: None,
            token_file: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            code: self.code,
            suggestion: self.suggestion,
            token_file: self.token_file,
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

fn internal(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
}

fn unauthorized(decision: AuthDecision, token_file: &Path) -> AppError {
    let message = match decision {
        AuthDecision::MissingCredential => "Unauthorized: missing Authorization header",
        _ => "Unauthorized: invalid token",
    };
    AppError {
        suggestion: Some(
            "Send `Authorization: Bearer <token>` with the token stored in the token file"
                .to_string(),
        ),
        token_file: Some(token_file.display().to_string()),
        ..AppError::new(StatusCode::UNAUTHORIZED, "unauthorized", message)
    }
}

// ============ Middleware ============

/// Answers every `OPTIONS` request with an empty `200`; the CORS layer
/// around it adds the headers.
async fn answer_preflight(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        return StatusCode::OK.into_response();
    }
    next.run(request).await
}

async fn require_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let decision = auth::authorize(&state.token_file, header);
    if decision.is_allowed() {
        next.run(request).await
    } else {
        tracing::debug!(path = %request.uri().path(), ?decision, "rejected request");
        unauthorized(decision, &state.token_file).into_response()
    }
}

// ============ Helpers ============

/// Parses a JSON body; an empty body reads as `T::default()`.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, AppError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| bad_request(format!("Invalid JSON body: {e}")))
}

/// Runs aggregation on the blocking pool. A panic inside a reader is logged
/// and becomes a 500 for this request only.
async fn aggregate(state: &AppState, request: ContextRequest) -> Result<UnifiedContext, AppError> {
    let root = state.root.clone();
    let readers = state.readers.clone();
    tokio::task::spawn_blocking(move || context::aggregate(&root, &readers, &request))
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "context aggregation failed");
            internal("context aggregation failed")
        })
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    port: u16,
    pid: u32,
    version: &'static str,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        port: state.port,
        pid: std::process::id(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============ GET /api/context/status ============

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    status: &'static str,
    sources: SourcePresence,
    item_count: usize,
}

async fn handle_status(State(state): State<AppState>) -> Result<Json<StatusResponse>, AppError> {
    let ctx = aggregate(&state, ContextRequest::browse()).await?;
    Ok(Json(StatusResponse {
        status: "ok",
        sources: ctx.sources,
        item_count: ctx.items.len(),
    }))
}

// ============ POST /api/context ============

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContextBody {
    query: Option<String>,
    task_type: Option<String>,
    max_items: Option<usize>,
}

async fn handle_context(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<UnifiedContext>, AppError> {
    let body: ContextBody = parse_body(&body)?;
    let request = ContextRequest {
        query: body.query,
        task_type: body.task_type,
        max_items: body.max_items,
    };
    Ok(Json(aggregate(&state, request).await?))
}

// ============ POST /api/context/search ============

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchBody {
    query: Option<String>,
    max_items: Option<usize>,
}

async fn handle_search(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<UnifiedContext>, AppError> {
    let body: SearchBody = parse_body(&body)?;
    let query = body
        .query
        .filter(|q| !q.trim().is_empty())
        .ok_or_else(|| bad_request("query is required"))?;
    let request = ContextRequest::search(query, body.max_items.unwrap_or(DEFAULT_SEARCH_ITEMS));
    Ok(Json(aggregate(&state, request).await?))
}

// ============ Fallback ============

async fn handle_not_found(uri: Uri) -> AppError {
    AppError::new(
        StatusCode::NOT_FOUND,
        "not_found",
        format!("no route for {}", uri.path()),
    )
}
