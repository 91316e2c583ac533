//! HTTP surface: project management, progress polling, saved reports and
//! an OpenAI-compatible proxy to the configured provider.

mod error;
mod openai;
mod projects;

pub use error::ApiError;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::routing::{delete, get, post};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use crate::engine::PptEngine;
use crate::repository::{BoardRepository, ProjectRepository};
use crate::research::ReportGenerator;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub projects: Arc<dyn ProjectRepository>,
    pub boards: Arc<dyn BoardRepository>,
    pub engine: Arc<PptEngine>,
    pub reports: Arc<ReportGenerator>,
}

/// Every route, with permissive CORS for browser clients.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(projects::health))
        .route("/api/scenarios", get(projects::scenarios))
        .route(
            "/api/projects",
            get(projects::list_projects).post(projects::create_project),
        )
        .route(
            "/api/projects/:id",
            get(projects::get_project).delete(projects::delete_project),
        )
        .route("/api/projects/:id/todo", get(projects::get_todo))
        .route("/api/projects/:id/generate", post(projects::generate))
        .route("/api/projects/:id/archive", post(projects::archive))
        .route("/api/projects/:id/template", post(projects::select_template))
        .route("/api/research/reports", get(projects::list_reports))
        .route(
            "/api/research/reports/:filename",
            delete(projects::delete_report),
        )
        .route("/v1/chat/completions", post(openai::chat_completions))
        .route("/v1/completions", post(openai::completions))
        .route("/v1/models", get(openai::models))
        .layer(cors)
        .with_state(state)
}

/// Serve until Ctrl+C.
pub async fn run(bind: &str, port: u16, state: AppState) -> Result<()> {
    let addr: SocketAddr = format!("{bind}:{port}")
        .parse()
        .with_context(|| format!("invalid address: {bind}:{port}"))?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    log::info!("listening on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("shutdown signal received, stopping server...");
        })
        .await
        .context("server error")
}
