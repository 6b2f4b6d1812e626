//! HTTP client service
//!
//! Replays inbound requests against the upstream and hands back the live,
//! unbuffered response body

use crate::config::Settings;
use crate::utils::error::{ProxyError, ProxyResult};
use anyhow::{Context, Result};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::Client;
use tracing::{debug, warn};

/// Live upstream body, read once
pub type ByteStream = BoxStream<'static, Result<Bytes, reqwest::Error>>;

/// Headers that describe a single connection rather than the message
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Copy `headers` without hop-by-hop fields or fields named in `Connection`
pub fn strip_hop_headers(headers: &HeaderMap) -> HeaderMap {
    let connection_named: Vec<String> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let lower = name.as_str();
        if HOP_BY_HOP.contains(&lower) || connection_named.iter().any(|n| n == lower) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Headers sent upstream for an inbound request
///
/// `host` is dropped so the client derives it from the upstream URL.
pub fn upstream_request_headers(inbound: &HeaderMap, identity_encoding: bool) -> HeaderMap {
    let mut headers = strip_hop_headers(inbound);
    headers.remove(header::HOST);
    if identity_encoding {
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static("identity"));
    }
    headers
}

/// Status, headers and body stream of an upstream answer
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: ByteStream,
}

impl std::fmt::Debug for UpstreamResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

impl UpstreamResponse {
    /// Response is a Server-Sent-Events stream
    pub fn is_event_stream(&self) -> bool {
        self.headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_start().to_ascii_lowercase().starts_with("text/event-stream"))
            .unwrap_or(false)
    }
}

/// Upstream HTTP client shared by all requests
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: Client,
    identity_encoding: bool,
}

impl UpstreamClient {
    /// Create a new client instance
    pub fn new(settings: &Settings) -> Result<Self> {
        // No total timeout: event streams stay open for as long as the model writes
        let mut builder = Client::builder()
            .connect_timeout(settings.connect_timeout())
            .read_timeout(settings.read_timeout())
            .user_agent(concat!("tokenwatch/", env!("CARGO_PKG_VERSION")));
        if !settings.upstream.use_system_proxy {
            builder = builder.no_proxy();
        }
        let client = builder.build().context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            identity_encoding: settings.upstream.identity_encoding,
        })
    }

    /// Issue the request and return as soon as the response headers arrive
    pub async fn forward(
        &self,
        method: Method,
        url: &str,
        inbound_headers: &HeaderMap,
        body: Option<reqwest::Body>,
    ) -> ProxyResult<UpstreamResponse> {
        debug!("Forwarding {} {}", method, url);

        let headers = upstream_request_headers(inbound_headers, self.identity_encoding);
        let mut request = self.client.request(method, url).headers(headers);
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(classify_error)?;

        let status = response.status();
        if !status.is_success() {
            debug!("Upstream answered {} for {}", status, url);
        }

        Ok(UpstreamResponse {
            status,
            headers: strip_hop_headers(response.headers()),
            body: response.bytes_stream().boxed(),
        })
    }
}

/// Map a transport failure to the gateway error the caller sees
fn classify_error(e: reqwest::Error) -> ProxyError {
    let detail = match e.url() {
        Some(url) => format!("{} ({})", url, root_cause(&e)),
        None => root_cause(&e),
    };

    if e.is_timeout() {
        warn!("Upstream timed out: {}", detail);
        ProxyError::UpstreamTimeout(detail)
    } else {
        warn!("Upstream unreachable: {}", detail);
        ProxyError::UpstreamUnreachable(detail)
    }
}

fn root_cause(e: &(dyn std::error::Error + 'static)) -> String {
    let mut current = e;
    while let Some(source) = current.source() {
        current = source;
    }
    current.to_string()
}

/// Header name lookup that tolerates invalid names
pub fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    let name = HeaderName::from_bytes(name.as_bytes()).ok()?;
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_client_creation() {
        let client = UpstreamClient::new(&Settings::default());
        assert!(client.is_ok());
    }

    #[test]
    fn test_hop_by_hop_headers_are_stripped() {
        let inbound = headers(&[
            ("connection", "keep-alive, x-session-hint"),
            ("keep-alive", "timeout=5"),
            ("transfer-encoding", "chunked"),
            ("x-session-hint", "abc"),
            ("x-api-key", "sk-ant-test"),
            ("content-length", "42"),
        ]);

        let out = strip_hop_headers(&inbound);
        assert!(out.get("connection").is_none());
        assert!(out.get("keep-alive").is_none());
        assert!(out.get("transfer-encoding").is_none());
        assert!(out.get("x-session-hint").is_none());
        assert_eq!(out.get("x-api-key").unwrap(), "sk-ant-test");
        assert_eq!(out.get("content-length").unwrap(), "42");
    }

    #[test]
    fn test_upstream_request_headers() {
        let inbound = headers(&[
            ("host", "127.0.0.1:8877"),
            ("accept-encoding", "gzip, br"),
            ("authorization", "Bearer token"),
        ]);

        let out = upstream_request_headers(&inbound, true);
        assert!(out.get("host").is_none());
        assert_eq!(out.get("accept-encoding").unwrap(), "identity");
        assert_eq!(out.get("authorization").unwrap(), "Bearer token");

        let passthrough = upstream_request_headers(&inbound, false);
        assert_eq!(passthrough.get("accept-encoding").unwrap(), "gzip, br");
    }

    #[test]
    fn test_header_str() {
        let map = headers(&[("user-agent", "claude-cli/1.0")]);
        assert_eq!(header_str(&map, "User-Agent"), Some("claude-cli/1.0"));
        assert_eq!(header_str(&map, "x-missing"), None);
    }

    #[tokio::test]
    async fn test_connection_refused_is_unreachable() {
        let mut settings = Settings::default();
        settings.upstream.use_system_proxy = false;
        let client = UpstreamClient::new(&settings).unwrap();
        let result = client
            .forward(Method::GET, "http://127.0.0.1:1/v1/messages", &HeaderMap::new(), None)
            .await;

        assert!(matches!(result, Err(ProxyError::UpstreamUnreachable(_))));
    }
}
