//! Health check handlers
//!
//! Provides application health status check endpoints

use crate::handlers::AppState;
use axum::{extract::State, http::StatusCode, response::Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

const SERVICE_NAME: &str = "tokenwatch-proxy";

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service name
    pub service: String,
    /// Version information
    pub version: String,
    /// Timestamp
    pub timestamp: String,
    /// Details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthDetails {
    pub anthropic_upstream: String,
    pub openai_upstream: String,
    /// Uptime in seconds
    pub uptime_seconds: u64,
    pub record_queue: RecordQueueStatus,
}

/// Record sink queue state
#[derive(Debug, Serialize, Deserialize)]
pub struct RecordQueueStatus {
    pub queued: usize,
    pub capacity: usize,
    pub dropped: u64,
    pub accepting: bool,
}

fn build_response(state: &AppState, status: &str) -> HealthResponse {
    let sink = &state.sink;

    HealthResponse {
        status: status.to_string(),
        service: SERVICE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        details: Some(HealthDetails {
            anthropic_upstream: state.settings.upstream.anthropic_url.clone(),
            openai_upstream: state.settings.upstream.openai_url.clone(),
            uptime_seconds: state.started_at.elapsed().as_secs(),
            record_queue: RecordQueueStatus {
                queued: sink.queued(),
                capacity: sink.capacity(),
                dropped: sink.dropped(),
                accepting: !sink.is_closed(),
            },
        }),
    }
}

/// Basic health check
///
/// GET /health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    debug!("Executing health check");
    Json(build_response(&state, "ok"))
}

/// Readiness check
///
/// GET /health/ready
/// Ready while the record queue still accepts records
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, StatusCode> {
    debug!("Executing readiness check");

    if state.sink.is_closed() {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    }

    Ok(Json(build_response(&state, "ready")))
}

/// Liveness check
///
/// GET /health/live
pub async fn liveness_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    debug!("Executing liveness check");
    Json(build_response(&state, "alive"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;
    use crate::services::{MemoryStore, PricingTable, RecordSink};
    use std::time::Duration;

    fn create_test_state() -> Arc<AppState> {
        let (sink, _worker) = RecordSink::spawn(Arc::new(MemoryStore::new()), 4, Duration::from_millis(10));
        Arc::new(AppState::new(Settings::default(), PricingTable::builtin(), sink).unwrap())
    }

    #[tokio::test]
    async fn test_health_check() {
        let state = create_test_state();
        let response = health_check(State(state)).await.0;

        assert_eq!(response.status, "ok");
        assert_eq!(response.service, "tokenwatch-proxy");
        let details = response.details.unwrap();
        assert_eq!(details.anthropic_upstream, "https://api.anthropic.com");
        assert_eq!(details.record_queue.capacity, 4);
        assert!(details.record_queue.accepting);
    }

    #[tokio::test]
    async fn test_liveness_check() {
        let state = create_test_state();
        let response = liveness_check(State(state)).await.0;
        assert_eq!(response.status, "alive");
    }

    #[tokio::test]
    async fn test_readiness_check() {
        let state = create_test_state();
        let result = readiness_check(State(state)).await;
        assert!(result.is_ok());
        assert_eq!(result.unwrap().0.status, "ready");
    }
}
