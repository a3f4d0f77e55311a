//! HTTP server implementation using Axum.

use std::sync::Arc;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use herald_core::GatewayConfig;
use herald_engine::DispatchEngine;
use herald_store::HeraldDb;

/// Shared state for the gateway server.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<HeraldDb>,
    pub engine: Arc<DispatchEngine>,
    pub start_time: std::time::Instant,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/api/v1/health", get(super::routes::health_check))
        .route("/api/v1/notifications", post(super::routes::create_notification))
        .route("/api/v1/notifications", get(super::routes::list_notifications))
        .route("/api/v1/notifications/{id}", get(super::routes::get_notification))
        .route(
            "/api/v1/notifications/{id}",
            delete(super::routes::delete_notification),
        )
        .route(
            "/api/v1/notifications/{id}/cancel",
            post(super::routes::cancel_notification),
        )
        .route(
            "/api/v1/notifications/{id}/stats",
            get(super::routes::notification_stats),
        )
        .route(
            "/api/v1/notifications/{id}/recipients",
            get(super::routes::notification_recipients),
        )
        .route(
            "/api/v1/notifications/{id}/resend",
            post(super::routes::resend_notification),
        )
        .route("/api/v1/delivery-events", post(super::routes::delivery_event))
        .route("/api/v1/participants", post(super::routes::upsert_participant));

    api.layer(
        CorsLayer::new()
            .allow_methods([
                axum::http::Method::GET,
                axum::http::Method::POST,
                axum::http::Method::DELETE,
                axum::http::Method::OPTIONS,
            ])
            .allow_headers(Any)
            .allow_origin(Any),
    )
    .layer(TraceLayer::new_for_http())
    .with_state(Arc::new(state))
}

/// Start the HTTP server.
pub async fn start(config: &GatewayConfig, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🌐 Gateway server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
