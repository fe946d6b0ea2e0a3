//! Local HTTP API over the extracted chats, plus the editor automation actions.

use crate::automation::{AutomationError, Automator, SendRequest, TargetContext};
use crate::exporter::{self, ExportFormat};
use crate::extract;
use crate::format::{ChatFormatter, FormattedChat};
use crate::project::ProjectNamer;
use crate::workspace::StorageLayout;
use axum::Router;
use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use eyre::{Context, Result};
use serde::Deserialize;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub frontend_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            frontend_dir: None,
        }
    }
}

/// Shared state accessible from handlers.
#[derive(Clone)]
pub struct AppState {
    pub layout: Arc<StorageLayout>,
    pub namer: Arc<ProjectNamer>,
    pub automator: Automator,
    /// Serializes automation sequences and remembers the targeted workspace.
    pub target: Arc<Mutex<TargetContext>>,
}

impl AppState {
    pub fn new(layout: StorageLayout, namer: ProjectNamer, automator: Automator) -> Self {
        Self {
            layout: Arc::new(layout),
            namer: Arc::new(namer),
            automator,
            target: Arc::new(Mutex::new(TargetContext::default())),
        }
    }

    fn formatted_chats(&self) -> Vec<FormattedChat> {
        let chats = extract::extract_chats(&self.layout, &self.namer);
        ChatFormatter::new(&self.namer, &self.layout).format_all(&chats)
    }

    fn formatted_chat(&self, session_id: &str) -> Option<FormattedChat> {
        let chat = extract::find_chat(&self.layout, &self.namer, session_id)?;
        Some(ChatFormatter::new(&self.namer, &self.layout).format(&chat))
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({ "success": false, "error": self.message })),
        )
            .into_response()
    }
}

impl From<AutomationError> for ApiError {
    fn from(e: AutomationError) -> Self {
        let status = match &e {
            AutomationError::Unsupported => StatusCode::NOT_IMPLEMENTED,
            AutomationError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AutomationError::EmptyMessage | AutomationError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            AutomationError::UnknownWorkspace(_) => StatusCode::NOT_FOUND,
            AutomationError::Spawn { .. } | AutomationError::Command { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            warn!("Automation failed: {e}");
        }
        Self::new(status, e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::bad_request(e.body_text())
    }
}

impl From<tokio::task::JoinError> for ApiError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, format!("Worker task failed: {e}"))
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

async fn blocking<T, F>(f: F) -> ApiResult<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await?)
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn router(state: AppState, frontend_dir: Option<&std::path::Path>) -> Router {
    let api = Router::new()
        .route("/health", get(health))
        .route("/api/chats", get(list_chats))
        .route("/api/chat/{id}", get(get_chat))
        .route("/api/chat/{id}/export", get(export_chat))
        .route("/api/cursor/sidebar/status", get(sidebar_status))
        .route("/api/cursor/sidebar/open", post(sidebar_open))
        .route("/api/cursor/open", post(cursor_open))
        .route("/api/cursor/activate", post(cursor_activate))
        .route("/api/cursor/quit", post(cursor_quit))
        .route("/api/cursor/switch-project", post(switch_project))
        .route("/api/send-message", post(send_message))
        .route("/api/send-to-cursor", post(send_message))
        .with_state(state);

    let app = match frontend_dir {
        Some(dir) => {
            let index = ServeFile::new(dir.join("index.html"));
            api.fallback_service(ServeDir::new(dir).fallback(index))
        }
        None => api,
    };

    app.layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Bind and serve until Ctrl-C.
pub async fn serve(config: ServerConfig, state: AppState) -> Result<()> {
    if let Some(dir) = &config.frontend_dir
        && !dir.join("index.html").is_file()
    {
        warn!(dir = %dir.display(), "Frontend directory has no index.html");
    }
    let app = router(state, config.frontend_dir.as_deref());

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("Failed to bind {addr}"))?;
    info!("Listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .wrap_err("Server error")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Read handlers
// ---------------------------------------------------------------------------

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn list_chats(State(state): State<AppState>) -> ApiResult<Json<Vec<FormattedChat>>> {
    let chats = blocking(move || state.formatted_chats()).await?;
    info!(count = chats.len(), "Serving chat list");
    Ok(Json(chats))
}

async fn get_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<FormattedChat>> {
    blocking(move || state.formatted_chat(&id))
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Chat not found"))
}

#[derive(Debug, Deserialize)]
struct ExportQuery {
    #[serde(default)]
    format: Option<String>,
}

async fn export_chat(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    let format = query
        .format
        .as_deref()
        .map(ExportFormat::parse)
        .unwrap_or_default();
    let lookup = id.clone();
    let chat = blocking(move || state.formatted_chat(&lookup))
        .await?
        .ok_or_else(|| ApiError::not_found("Chat not found"))?;

    let body = exporter::render(&chat, format)
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let disposition = format!(
        "attachment; filename=\"{}\"",
        exporter::attachment_filename(&id, format)
    );
    Ok((
        [
            (header::CONTENT_TYPE, format.content_type().to_string()),
            (header::CONTENT_DISPOSITION, disposition),
            (header::CACHE_CONTROL, "no-store".to_string()),
        ],
        body,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct SidebarQuery {
    #[serde(default)]
    workspace_id: Option<String>,
}

async fn sidebar_status(
    State(state): State<AppState>,
    Query(query): Query<SidebarQuery>,
) -> ApiResult<Json<Value>> {
    let Some(workspace_id) = query.workspace_id.filter(|w| !w.is_empty()) else {
        return Err(ApiError::bad_request("workspace_id is required"));
    };
    let layout = state.layout.clone();
    let ws = workspace_id.clone();
    let hidden = blocking(move || layout.panel_hidden(&ws))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("Workspace not found: {workspace_id}")))?;
    Ok(Json(json!({
        "success": true,
        "workspace_id": workspace_id,
        "panel_hidden": hidden,
        "panel_open": !hidden,
        "needs_open_command": hidden,
    })))
}

// ---------------------------------------------------------------------------
// Automation handlers
// ---------------------------------------------------------------------------

async fn cursor_open(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    run_action(state, "Editor launched", |a| a.open()).await
}

async fn cursor_activate(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    run_action(state, "Editor activated", |a| a.activate()).await
}

async fn cursor_quit(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    run_action(state, "Editor asked to quit", |a| a.quit()).await
}

/// Run a simple action while holding the target lock.
async fn run_action(
    state: AppState,
    message: &'static str,
    action: impl FnOnce(&Automator) -> crate::automation::Result<()> + Send + 'static,
) -> ApiResult<Json<Value>> {
    let guard = state.target.clone().lock_owned().await;
    let automator = state.automator.clone();
    blocking(move || {
        let _guard = guard;
        action(&automator)
    })
    .await??;
    Ok(Json(json!({ "success": true, "message": message })))
}

#[derive(Debug, Default, Deserialize)]
struct SidebarOpenRequest {
    #[serde(default)]
    workspace_id: Option<String>,
    #[serde(default)]
    skip_activation: bool,
}

async fn sidebar_open(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    // The body is optional for this endpoint.
    let request: SidebarOpenRequest = if body.iter().all(u8::is_ascii_whitespace) {
        SidebarOpenRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(format!("Invalid body: {e}")))?
    };
    let guard = state.target.clone().lock_owned().await;
    let automator = state.automator.clone();
    let workspace_id = request.workspace_id.filter(|w| !w.is_empty());
    let ws = workspace_id.clone();
    let outcome = blocking(move || {
        let _guard = guard;
        automator.open_panel(ws.as_deref(), request.skip_activation)
    })
    .await??;
    Ok(Json(json!({
        "success": true,
        "workspace_id": workspace_id,
        "toggled": outcome.toggled,
        "confirmed": outcome.confirmed,
    })))
}

#[derive(Debug, Deserialize)]
struct SwitchProjectRequest {
    #[serde(rename = "rootPath")]
    root_path: String,
    #[serde(default)]
    workspace_id: Option<String>,
}

async fn switch_project(
    State(state): State<AppState>,
    body: std::result::Result<Json<SwitchProjectRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(request) = body?;
    let mut guard = state.target.clone().lock_owned().await;
    let automator = state.automator.clone();
    let root = request.root_path.clone();
    blocking(move || {
        automator.switch_project(&mut guard, &request.root_path, request.workspace_id.as_deref())
    })
    .await??;
    Ok(Json(json!({
        "success": true,
        "message": format!("Switched to {root}"),
    })))
}

async fn send_message(
    State(state): State<AppState>,
    body: std::result::Result<Json<SendRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(request) = body?;
    if request.message.trim().is_empty() {
        return Err(AutomationError::EmptyMessage.into());
    }
    let mut guard = state.target.clone().lock_owned().await;
    let automator = state.automator.clone();
    let outcome = blocking(move || automator.send_message(&mut guard, &request)).await??;
    Ok(Json(json!({
        "success": true,
        "message": "Message sent to Cursor",
        "project_switched": outcome.project_switched,
        "attempts": outcome.attempts,
    })))
}
