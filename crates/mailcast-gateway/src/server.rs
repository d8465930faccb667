//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use mailcast_core::error::{MailcastError, Result};
use mailcast_engine::{JobRegistry, Scheduler};

use super::routes;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<Scheduler>,
    pub registry: Arc<JobRegistry>,
}

impl AppState {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        let registry = Arc::clone(scheduler.registry());
        Self { scheduler, registry }
    }
}

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(routes::health_check))
        .route("/api/campaigns/{id}/schedule", post(routes::schedule_campaign))
        .route("/api/campaigns/{id}/unschedule", post(routes::unschedule_campaign))
        .route("/api/campaigns/{id}/execute", post(routes::execute_campaign))
        .route("/api/campaigns/{id}/pause", post(routes::pause_campaign))
        .route("/api/campaigns/{id}/schedule-status", get(routes::schedule_status))
        .route("/api/jobs", get(routes::list_jobs))
        .route("/api/jobs/{id}", get(routes::job_status))
        .route("/api/jobs/{id}/stop", post(routes::stop_job))
        .route("/api/schedule/validate", post(routes::validate_pattern))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Bind and serve until the process exits.
pub async fn serve(state: Arc<AppState>, host: &str, port: u16) -> Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| MailcastError::Config(format!("Bind {addr}: {e}")))?;
    tracing::info!("🌐 Gateway listening on http://{addr}");

    axum::serve(listener, router(state))
        .await
        .map_err(|e| MailcastError::Config(format!("Server: {e}")))?;
    Ok(())
}
