use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router,
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use super::api::{self, AppState, SharedState};
use super::db::{ConsoleDb, DbHandle};
use super::embedded::Assets;
use super::models::CAPTURES_URL_PREFIX;
use super::ws;
use crate::config::{AnalyzerSection, ConsoleToml};

/// Configuration for the console server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub mounts: StaticMounts,
    pub analyzer: AnalyzerSection,
    pub dev_mode: bool,
    pub open_browser: bool,
}

/// Directories served as-is next to the embedded dashboard.
#[derive(Debug, Clone)]
pub struct StaticMounts {
    pub captures_dir: PathBuf,
    pub src_dir: PathBuf,
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_toml(&ConsoleToml::default())
    }
}

impl ServerConfig {
    pub fn from_toml(config: &ConsoleToml) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            db_path: config.database.path.clone(),
            mounts: StaticMounts {
                captures_dir: config.paths.captures_dir.clone(),
                src_dir: config.paths.src_dir.clone(),
                static_dir: config.paths.static_dir.clone(),
            },
            analyzer: config.analyzer.clone(),
            dev_mode: config.server.dev_mode,
            open_browser: false,
        }
    }
}

/// Build the full application router: API, WebSocket, static mounts and the dashboard pages.
pub fn build_router(state: SharedState, mounts: &StaticMounts) -> Router {
    api::api_router()
        .route("/ws", get(ws::ws_handler))
        .route("/dashboard.html", get(dashboard_handler))
        .nest_service(CAPTURES_URL_PREFIX, ServeDir::new(&mounts.captures_dir))
        .nest_service("/src", ServeDir::new(&mounts.src_dir))
        .nest_service("/static", ServeDir::new(&mounts.static_dir))
        .fallback(static_handler)
        .with_state(state)
}

fn asset_response(path: &str) -> Option<Response> {
    let content = Assets::get(path)?;
    let mime = mime_guess::from_path(path).first_or_octet_stream();
    Some(
        (
            [(header::CONTENT_TYPE, mime.as_ref().to_string())],
            Body::from(content.data.into_owned()),
        )
            .into_response(),
    )
}

/// The dashboard requires a signed-in session.
async fn dashboard_handler(State(state): State<SharedState>, headers: HeaderMap) -> Response {
    if state.sessions.user_for(&headers).is_none() {
        return Redirect::to("/login.html").into_response();
    }
    asset_response("dashboard.html")
        .unwrap_or_else(|| (StatusCode::NOT_FOUND, "dashboard.html missing").into_response())
}

/// Serve embedded pages; `/` maps to `index.html`.
async fn static_handler(req: Request<Body>) -> Response {
    let path = req.uri().path().trim_start_matches('/');
    let path = if path.is_empty() { "index.html" } else { path };
    asset_response(path).unwrap_or_else(|| (StatusCode::NOT_FOUND, "文件不存在").into_response())
}

/// Start the console server and run until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    if let Some(parent) = config.db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    std::fs::create_dir_all(&config.mounts.captures_dir).with_context(|| {
        format!(
            "Failed to create captures directory: {}",
            config.mounts.captures_dir.display()
        )
    })?;
    tracing::info!(captures_dir = %config.mounts.captures_dir.display(), "Capture directory ready");

    let db = ConsoleDb::new(&config.db_path).context("Failed to initialize console database")?;
    let state = Arc::new(AppState::new(
        DbHandle::new(db),
        config.analyzer.clone(),
        config.mounts.captures_dir.clone(),
    ));

    let mut app = build_router(state.clone(), &config.mounts);
    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    let url = format!("http://{}", local_addr);
    tracing::info!(%url, db_path = %config.db_path.display(), "Poker console running");

    if config.open_browser
        && let Err(e) = open::that(&url)
    {
        tracing::warn!(error = %e, "Failed to open browser");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    state.supervisor.shutdown().await;
    tracing::info!("Server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
