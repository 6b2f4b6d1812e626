//! Dialect router
//!
//! Maps an inbound request path to an upstream base URL and the dialect its
//! responses are parsed with

use crate::config::settings::UpstreamConfig;
use crate::models::Dialect;
use crate::utils::error::{ProxyError, ProxyResult};
use serde_json::Value;
use tracing::debug;

const ANTHROPIC_MOUNT: &str = "/anthropic";
const OPENAI_MOUNT: &str = "/openai";

/// Unprefixed API paths whose dialect is known from the path alone
const ANTHROPIC_PATHS: &[&str] = &["/v1/messages"];
const OPENAI_PATHS: &[&str] = &["/v1/chat/completions", "/v1/completions", "/v1/embeddings"];

/// Where and how one request is forwarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub dialect: Dialect,
    pub upstream_base: String,
    /// Path sent upstream, with any mount prefix removed
    pub forward_path: String,
}

impl Route {
    pub fn upstream_url(&self, query: Option<&str>) -> String {
        match query {
            Some(q) if !q.is_empty() => format!("{}{}?{}", self.upstream_base, self.forward_path, q),
            _ => format!("{}{}", self.upstream_base, self.forward_path),
        }
    }
}

enum PathClass {
    Mounted(Dialect, String),
    /// `/v1/...` path that needs a look at the body
    Ambiguous,
    Unknown,
}

/// Matches `prefix` as a whole path segment sequence
fn segment_prefix<'a>(path: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

fn classify(path: &str) -> PathClass {
    for (mount, dialect) in [
        (ANTHROPIC_MOUNT, Dialect::Anthropic),
        (OPENAI_MOUNT, Dialect::OpenAiCompatible),
    ] {
        if let Some(rest) = segment_prefix(path, mount) {
            let forward = if rest.is_empty() { "/" } else { rest };
            return PathClass::Mounted(dialect, forward.to_string());
        }
    }

    if ANTHROPIC_PATHS.iter().any(|p| segment_prefix(path, p).is_some()) {
        return PathClass::Mounted(Dialect::Anthropic, path.to_string());
    }
    if OPENAI_PATHS.iter().any(|p| segment_prefix(path, p).is_some()) {
        return PathClass::Mounted(Dialect::OpenAiCompatible, path.to_string());
    }
    if segment_prefix(path, "/v1").is_some() {
        return PathClass::Ambiguous;
    }

    PathClass::Unknown
}

/// Guess the dialect from a request payload
fn sniff_body(body: &[u8]) -> Option<Dialect> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let object = value.as_object()?;

    let claude_model = object
        .get("model")
        .and_then(Value::as_str)
        .is_some_and(|m| m.starts_with("claude"));

    if claude_model || object.contains_key("anthropic_version") {
        Some(Dialect::Anthropic)
    } else {
        Some(Dialect::OpenAiCompatible)
    }
}

/// Routing table built once from the configured upstreams
#[derive(Debug, Clone)]
pub struct DialectRouter {
    anthropic_base: String,
    openai_base: String,
}

impl DialectRouter {
    pub fn new(upstream: &UpstreamConfig) -> Self {
        Self {
            anthropic_base: upstream.anthropic_url.trim_end_matches('/').to_string(),
            openai_base: upstream.openai_url.trim_end_matches('/').to_string(),
        }
    }

    fn base_for(&self, dialect: Dialect) -> &str {
        match dialect {
            Dialect::Anthropic => &self.anthropic_base,
            Dialect::OpenAiCompatible => &self.openai_base,
        }
    }

    /// Whether routing `path` needs the buffered request body
    pub fn requires_body_peek(&self, path: &str) -> bool {
        matches!(classify(path), PathClass::Ambiguous)
    }

    /// Resolve a request path, peeking at `body` for ambiguous paths
    pub fn route(&self, path: &str, body: Option<&[u8]>) -> ProxyResult<Route> {
        let (dialect, forward_path) = match classify(path) {
            PathClass::Mounted(dialect, forward_path) => (dialect, forward_path),
            PathClass::Ambiguous => {
                let dialect = body
                    .and_then(sniff_body)
                    .ok_or_else(|| ProxyError::RouteNotFound(path.to_string()))?;
                (dialect, path.to_string())
            }
            PathClass::Unknown => return Err(ProxyError::RouteNotFound(path.to_string())),
        };

        debug!("Routed {} to {} upstream", path, dialect);

        Ok(Route {
            dialect,
            upstream_base: self.base_for(dialect).to_string(),
            forward_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Settings;

    fn create_test_router() -> DialectRouter {
        let mut settings = Settings::default();
        settings.upstream.anthropic_url = "https://anthropic.example.com/".to_string();
        settings.upstream.openai_url = "https://openai.example.com/api/paas/v4".to_string();
        DialectRouter::new(&settings.upstream)
    }

    #[test]
    fn test_mount_prefix_is_stripped() {
        let router = create_test_router();

        let route = router.route("/anthropic/v1/messages", None).unwrap();
        assert_eq!(route.dialect, Dialect::Anthropic);
        assert_eq!(route.upstream_url(None), "https://anthropic.example.com/v1/messages");

        let route = router.route("/openai/chat/completions", None).unwrap();
        assert_eq!(route.dialect, Dialect::OpenAiCompatible);
        assert_eq!(
            route.upstream_url(Some("beta=true")),
            "https://openai.example.com/api/paas/v4/chat/completions?beta=true"
        );
    }

    #[test]
    fn test_bare_mount_forwards_root() {
        let router = create_test_router();
        let route = router.route("/openai", None).unwrap();
        assert_eq!(route.forward_path, "/");
    }

    #[test]
    fn test_well_known_unprefixed_paths() {
        let router = create_test_router();

        assert_eq!(router.route("/v1/messages", None).unwrap().dialect, Dialect::Anthropic);
        assert_eq!(
            router.route("/v1/messages/count_tokens", None).unwrap().dialect,
            Dialect::Anthropic
        );
        assert_eq!(
            router.route("/v1/chat/completions", None).unwrap().dialect,
            Dialect::OpenAiCompatible
        );
        assert!(!router.requires_body_peek("/v1/embeddings"));
    }

    #[test]
    fn test_ambiguous_path_peeks_body() {
        let router = create_test_router();
        assert!(router.requires_body_peek("/v1/responses"));

        let claude = br#"{"model":"claude-sonnet-4-5","input":"hi"}"#;
        assert_eq!(
            router.route("/v1/responses", Some(claude)).unwrap().dialect,
            Dialect::Anthropic
        );

        let versioned = br#"{"anthropic_version":"bedrock-2023-05-31"}"#;
        assert_eq!(
            router.route("/v1/responses", Some(versioned)).unwrap().dialect,
            Dialect::Anthropic
        );

        let other = br#"{"model":"gpt-4o","input":"hi"}"#;
        assert_eq!(
            router.route("/v1/responses", Some(other)).unwrap().dialect,
            Dialect::OpenAiCompatible
        );
    }

    #[test]
    fn test_route_not_found() {
        let router = create_test_router();

        assert!(matches!(router.route("/unknown/path", None), Err(ProxyError::RouteNotFound(_))));
        assert!(matches!(router.route("/anthropicx/v1", None), Err(ProxyError::RouteNotFound(_))));
        assert!(matches!(router.route("/v1/models", None), Err(ProxyError::RouteNotFound(_))));
        assert!(matches!(
            router.route("/v1/models", Some(b"not json")),
            Err(ProxyError::RouteNotFound(_))
        ));
    }
}
