//! Web server setup and routing

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::api;
use crate::state::AppState;

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(api::health))
        // Devices
        .route(
            "/api/devices",
            get(api::list_devices).post(api::create_device),
        )
        .route(
            "/api/devices/{id}",
            get(api::get_device)
                .patch(api::patch_device)
                .delete(api::delete_device),
        )
        .route(
            "/api/devices/{id}/capabilities",
            get(api::get_capabilities).put(api::put_capabilities),
        )
        .route(
            "/api/devices/{id}/capabilities/{capability}",
            post(api::invoke_capability),
        )
        // Discovery
        .route("/api/scan", get(api::scan_results).post(api::start_scan))
        .route("/api/scan/register", post(api::register_from_scan))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the web server until ctrl-c, then stop background tasks
pub async fn run(state: Arc<AppState>, bind: &str) -> Result<()> {
    let app = router(state.clone());

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, protocol = "HTTP", "Starting web server");

    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutting down");
            shutdown.cancel();
        })
        .await?;

    Ok(())
}
