//! HTTP server assembly.

use crate::handlers;
use crate::Result;
use axum::routing::{get, post};
use axum::Router;
use leadflow_core::config::GatewayConfig;
use leadflow_engine::{JobQueue, RateGovernor, TenantRegistry};
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: Arc<JobQueue>,
    pub governor: Arc<RateGovernor>,
    pub tenants: Arc<TenantRegistry>,
}

/// Build the gateway router.
pub fn router(state: AppState, cors: bool) -> Router {
    let router = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/api/messages", post(handlers::messages::enqueue_message))
        .route(
            "/api/tenants/:tenant_id/stats",
            get(handlers::stats::tenant_stats),
        )
        .route(
            "/webhooks/whatsapp/:tenant_id",
            get(handlers::webhooks::verify_subscription).post(handlers::webhooks::ingest_whatsapp),
        )
        .route("/webhooks/crm/:tenant_id", post(handlers::webhooks::ingest_crm))
        .layer(TraceLayer::new_for_http());

    let router = if cors {
        router.layer(CorsLayer::permissive())
    } else {
        router
    };

    router.with_state(state)
}

/// Bind and serve until the shutdown signal flips.
pub async fn serve(
    state: AppState,
    config: &GatewayConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "Gateway listening");

    axum::serve(listener, router(state, config.cors))
        .with_graceful_shutdown(async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        })
        .await?;

    info!("Gateway stopped");
    Ok(())
}
