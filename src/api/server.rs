use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use url::Url;

use crate::api::error::ErrorKind;
use crate::api::handler_utils::error_response;
use crate::pipeline::jobs::JobOrchestrator;
use crate::pipeline::runtime::{SharedProcessInvoker, TokioProcessInvoker};
use crate::settings::{AppSettings, GenerateMode, SettingsError};
use crate::storage::{now_unix_ms, ArtifactStore};

pub const SERVICE_NAME: &str = "adcraft-backend";
pub const LIVENESS_TEXT: &str = "AdCraft API is running.";
pub const CLIENT_SHELL_MISSING_TEXT: &str =
    "API is running. If you expect a UI, ensure the frontend build finished.";

#[derive(Clone)]
pub struct AppState {
    pub service_name: &'static str,
    pub service_version: &'static str,
    pub started_unix_ms: u128,
    pub jobs: JobOrchestrator,
    pub public_base_url: Option<Url>,
    pub fallback_base_url: Url,
}

impl AppState {
    pub fn new(settings: &AppSettings, invoker: SharedProcessInvoker) -> Result<Self, SettingsError> {
        let store = ArtifactStore::new(settings.uploads_dir.clone());
        let fallback = format!("http://localhost:{}/", settings.port);
        let fallback_base_url = Url::parse(fallback.as_str())
            .map_err(|_| SettingsError::InvalidPublicUrl(fallback.clone()))?;
        Ok(Self {
            service_name: SERVICE_NAME,
            service_version: env!("CARGO_PKG_VERSION"),
            started_unix_ms: now_unix_ms(),
            jobs: JobOrchestrator::new(store, invoker, settings),
            public_base_url: settings.public_base_url()?,
            fallback_base_url,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("server io error: {0}")]
    Io(#[from] std::io::Error),
}

pub fn build_router(settings: &AppSettings) -> Result<Router, ServerError> {
    build_router_with_invoker(settings, Arc::new(TokioProcessInvoker))
}

pub fn build_router_with_invoker(
    settings: &AppSettings,
    invoker: SharedProcessInvoker,
) -> Result<Router, ServerError> {
    let state = AppState::new(settings, invoker)?;
    state.jobs.store().ensure_root()?;
    if state.jobs.generate_mode() == GenerateMode::Echo {
        warn!(
            delay_ms = settings.generate_scene.echo_delay_ms,
            "scene generation runs in echo fallback mode; results are the input images"
        );
    }

    let uploads = ServeDir::new(state.jobs.store().root());
    let router = Router::new()
        .route("/", get(liveness_handler))
        .route("/health", get(health_handler))
        .route("/api/remove-bg", post(crate::api::jobs::remove_bg_handler))
        .route("/api/generate", post(crate::api::jobs::generate_handler))
        .nest_service("/uploads", uploads)
        .layer(DefaultBodyLimit::max(settings.max_upload_bytes))
        .with_state(state);

    let index = settings.client_dist_dir.join("index.html");
    let router = if index.is_file() {
        let shell = ServeDir::new(settings.client_dist_dir.as_path()).fallback(ServeFile::new(index));
        router.fallback_service(shell)
    } else {
        info!(
            dist = %settings.client_dist_dir.display(),
            "client shell not built; unmatched routes answer with a notice"
        );
        router.fallback(client_shell_missing_handler)
    };

    Ok(router
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http()))
}

pub async fn serve(settings: AppSettings) -> Result<(), ServerError> {
    let addr = settings.bind_addr()?;
    let app = build_router(&settings)?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(bind = %addr, uploads = %settings.uploads_dir.display(), "starting adcraft-backend HTTP surface");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn liveness_handler() -> &'static str {
    LIVENESS_TEXT
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "status": "ok",
            "service": state.service_name,
            "version": state.service_version,
            "started_unix_ms": state.started_unix_ms,
            "generate_mode": state.jobs.generate_mode().as_str(),
        })),
    )
}

async fn client_shell_missing_handler(method: Method) -> Response {
    if method == Method::GET || method == Method::HEAD {
        return (StatusCode::OK, CLIENT_SHELL_MISSING_TEXT).into_response();
    }
    error_response(
        StatusCode::NOT_FOUND,
        ErrorKind::Validation,
        "not_found",
        "Route not found",
        None,
    )
    .into_response()
}
