//! HTTP server setup and routing

use axum::{
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::error::{Error, Result};
use crate::pipeline::PipelineDeps;

/// Shared application context passed to all handlers
///
/// **Note:** AppContext implements Clone, which gives us `FromRef<AppContext>`
/// for free via Axum's blanket implementation.
#[derive(Clone)]
pub struct AppContext {
    pub deps: PipelineDeps,
}

/// Build the service router
pub fn create_router(ctx: AppContext) -> Router {
    Router::new()
        // Health endpoint
        .route("/health", get(super::handlers::health))

        // Student management
        .route("/api/students", get(super::handlers::list_students))
        .route("/api/students", post(super::handlers::create_student))

        // Problem pipeline
        .route("/api/problem", post(super::handlers::request_problem))
        .route("/api/problem/scaffold", post(super::handlers::request_scaffold))
        .route("/api/status", get(super::handlers::get_status))

        // Answering
        .route("/api/answer", post(super::handlers::submit_answer))
        .route("/api/skip", post(super::handlers::skip_problem))

        // Learner record
        .route("/api/history", get(super::handlers::get_history))
        .route("/api/stats", get(super::handlers::get_stats))

        // SSE event stream
        .route("/api/events", get(super::sse::event_stream))

        // Attach application context
        .with_state(ctx)

        // Enable CORS for local access
        .layer(CorsLayer::permissive())
}

/// Run the HTTP API server until shutdown
pub async fn run(port: u16, ctx: AppContext) -> Result<()> {
    let app = create_router(ctx);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind to {}: {}", addr, e)))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| Error::Internal(format!("Server error: {}", e)))?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
    }
    info!("Shutdown signal received");
}
