//! Proxy handler
//!
//! Forwards any non-health request to its upstream, relays the response as it
//! arrives and records usage off the response path

use crate::handlers::AppState;
use crate::middleware::RequestId;
use crate::models::{RecordStatus, UsageRecord};
use crate::services::client::header_str;
use crate::services::router::Route;
use crate::services::tee::{tee, StreamEnd, TeeOutcome};
use crate::services::usage::{ParsedUsage, UsageCollector};
use crate::services::{PricingTable, RecordSink};
use crate::utils::error::{ProxyError, ProxyResult};
use crate::utils::logging::log_record;
use axum::{
    body::{Body, HttpBody},
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode},
    response::Response,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, Instrument};

/// Per-request context, owned by the request task and then by its collector
#[derive(Debug, Clone)]
pub struct ProxySession {
    pub request_id: String,
    pub route: Route,
    pub method: String,
    pub source_app: String,
    pub timestamp: DateTime<Utc>,
    pub started_at: Instant,
}

impl ProxySession {
    fn new(request_id: String, route: Route, method: String, headers: &HeaderMap) -> Self {
        let source_app = header_str(headers, "user-agent")
            .filter(|ua| !ua.is_empty())
            .unwrap_or("unknown")
            .to_string();

        Self {
            request_id,
            route,
            method,
            source_app,
            timestamp: Utc::now(),
            started_at: Instant::now(),
        }
    }

    /// Build the record for this request
    pub fn into_record(
        self,
        parsed: ParsedUsage,
        status: RecordStatus,
        http_status: Option<u16>,
        streamed: bool,
        finished_at: Instant,
        pricing: &PricingTable,
    ) -> UsageRecord {
        let model = parsed.model.unwrap_or_default();
        let usage = parsed.usage;
        let cost = pricing.cost(&model, &usage);

        UsageRecord {
            request_id: parsed.response_id.unwrap_or(self.request_id),
            timestamp: self.timestamp,
            dialect: self.route.dialect,
            model,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_read_tokens: usage.cache_read_tokens,
            cache_write_tokens: usage.cache_write_tokens,
            cost,
            latency: finished_at.saturating_duration_since(self.started_at),
            status,
            http_status,
            streamed,
            source_app: self.source_app,
            method: self.method,
            path: self.route.forward_path,
        }
    }
}

/// Why usage could not be fully extracted from a delivered response
fn usage_gap(outcome: &TeeOutcome, parsed: &ParsedUsage) -> Option<ProxyError> {
    if outcome.is_complete() && parsed.complete {
        return None;
    }
    let reason = match &outcome.end {
        StreamEnd::Failed(e) => format!("upstream body failed after {} bytes: {}", outcome.bytes, e),
        StreamEnd::Aborted => format!("caller disconnected after {} bytes", outcome.bytes),
        StreamEnd::Completed if outcome.dropped_chunks > 0 => {
            format!("usage parser missed {} chunks", outcome.dropped_chunks)
        }
        StreamEnd::Completed if !parsed.complete => "no complete usage in response".to_string(),
        StreamEnd::Completed => return None,
    };
    Some(ProxyError::UpstreamProtocolError(reason))
}

/// Record status from the upstream status, the tee outcome and the parse result
pub fn record_status(upstream: StatusCode, outcome: &TeeOutcome, parsed: &ParsedUsage) -> RecordStatus {
    if !upstream.is_success() {
        RecordStatus::UpstreamError
    } else if usage_gap(outcome, parsed).is_some() {
        RecordStatus::ParseIncomplete
    } else {
        RecordStatus::Success
    }
}

/// Body length the caller-side server will write before it stops polling
fn expected_body_len(method: &Method, status: StatusCode, headers: &HeaderMap) -> Option<u64> {
    if *method == Method::HEAD || status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
        return Some(0);
    }
    header_str(headers, "content-length").and_then(|v| v.trim().parse::<u64>().ok())
}

/// Whether the inbound body carries any bytes to forward
///
/// Decided from the body itself: an HTTP/2 request may stream data with
/// neither `content-length` nor `transfer-encoding`.
fn has_body(body: &Body) -> bool {
    !body.is_end_stream() && body.size_hint().exact() != Some(0)
}

/// Hand a record to the sink without holding up the caller
fn submit_record(sink: RecordSink, record: UsageRecord) {
    log_record(&record);
    tokio::spawn(
        async move {
            // Refusals are logged by the sink
            let _ = sink.submit(record).await;
        }
        .in_current_span(),
    );
}

/// Proxy fallback handler
pub async fn proxy_request(State(state): State<Arc<AppState>>, request: Request) -> ProxyResult<Response> {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().to_string();

    let request_id = parts
        .extensions
        .get::<RequestId>()
        .cloned()
        .unwrap_or_default();

    let (route, upstream_body) = if state.router.requires_body_peek(&path) {
        let bytes = axum::body::to_bytes(body, state.settings.server.max_peek_bytes)
            .await
            .map_err(|e| ProxyError::InvalidRequest(format!("unreadable request body: {}", e)))?;
        let route = state.router.route(&path, Some(&bytes))?;
        let body = (!bytes.is_empty()).then(|| reqwest::Body::from(bytes));
        (route, body)
    } else {
        let route = state.router.route(&path, None)?;
        let body = has_body(&body).then(|| reqwest::Body::wrap_stream(body.into_data_stream()));
        (route, body)
    };

    let url = route.upstream_url(parts.uri.query());
    let session = ProxySession::new(request_id.0, route, parts.method.to_string(), &parts.headers);

    let upstream = match state
        .client
        .forward(parts.method.clone(), &url, &parts.headers, upstream_body)
        .await
    {
        Ok(upstream) => upstream,
        Err(e) => {
            let record = session.into_record(
                ParsedUsage::default(),
                RecordStatus::UpstreamError,
                None,
                false,
                Instant::now(),
                &state.pricing,
            );
            submit_record(state.sink.clone(), record);
            return Err(e);
        }
    };

    let streamed = upstream.is_event_stream();
    let status = upstream.status;
    debug!("Upstream {} for {} (streamed: {})", status, url, streamed);

    let expected_len = expected_body_len(&parts.method, status, &upstream.headers);
    let (relay, receiver) = tee(upstream.body, state.settings.parsing.tee_capacity, expected_len);
    let mut collector = UsageCollector::new(session.route.dialect, streamed, state.settings.parsing.max_buffer_bytes);
    let pricing = state.pricing.clone();
    let sink = state.sink.clone();

    tokio::spawn(
        async move {
            let outcome = receiver.drain(|chunk| collector.ingest(chunk)).await;
            let parsed = collector.finish();
            let record_status = record_status(status, &outcome, &parsed);

            if record_status == RecordStatus::ParseIncomplete {
                if let Some(gap) = usage_gap(&outcome, &parsed) {
                    debug!("Usage incomplete: {}", gap);
                }
            }

            let record = session.into_record(
                parsed,
                record_status,
                Some(status.as_u16()),
                streamed,
                outcome.finished_at,
                &pricing,
            );
            submit_record(sink, record);
        }
        .in_current_span(),
    );

    let mut response = Response::new(Body::from_stream(relay));
    *response.status_mut() = status;
    *response.headers_mut() = upstream.headers;
    Ok(response)
}
