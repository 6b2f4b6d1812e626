//! HTTP handlers module
//!
//! Health endpoints are served locally; every other request goes through the
//! proxy fallback

pub mod health;
pub mod proxy;

use crate::config::Settings;
use crate::middleware::request_logging_middleware;
use crate::services::{DialectRouter, PricingTable, RecordSink, UpstreamClient};
use anyhow::Result;
use axum::{middleware, routing::get, Router};
use std::sync::Arc;
use std::time::Instant;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Application state, built once at startup and shared read-only
#[derive(Clone)]
pub struct AppState {
    pub settings: Settings,
    pub router: DialectRouter,
    pub client: UpstreamClient,
    pub pricing: Arc<PricingTable>,
    pub sink: RecordSink,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(settings: Settings, pricing: PricingTable, sink: RecordSink) -> Result<Self> {
        let router = DialectRouter::new(&settings.upstream);
        let client = UpstreamClient::new(&settings)?;

        Ok(Self {
            settings,
            router,
            client,
            pricing: Arc::new(pricing),
            sink,
            started_at: Instant::now(),
        })
    }
}

/// Create application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let middleware_stack = ServiceBuilder::new()
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(request_logging_middleware));

    Router::new()
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::liveness_check))
        .route("/health/ready", get(health::readiness_check))
        .fallback(proxy::proxy_request)
        .with_state(state)
        .layer(middleware_stack)
}
