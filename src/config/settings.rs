//! Application configuration settings
//!
//! Defines all configuration structures and loading logic

use anyhow::{Context, Result};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Server configuration
    pub server: ServerConfig,
    /// Upstream endpoints
    pub upstream: UpstreamConfig,
    /// Usage extraction limits
    pub parsing: ParsingConfig,
    /// Record sink configuration
    pub sink: SinkConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen host
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Maximum inbound body size buffered when routing has to peek at it
    pub max_peek_bytes: usize,
}

/// Upstream configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Anthropic-style API base URL
    pub anthropic_url: String,
    /// OpenAI-compatible API base URL
    pub openai_url: String,
    /// Connect timeout in seconds
    pub connect_timeout: u64,
    /// Idle read timeout in seconds
    pub read_timeout: u64,
    /// Ask the upstream for uncompressed responses
    pub identity_encoding: bool,
    /// Honour HTTP(S)_PROXY / NO_PROXY for upstream calls
    pub use_system_proxy: bool,
}

/// Usage extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsingConfig {
    /// Bytes accumulated per response before parsing gives up
    pub max_buffer_bytes: usize,
    /// Chunk slots between the tee and the parser
    pub tee_capacity: usize,
}

/// Record sink configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Record queue capacity
    pub queue_capacity: usize,
    /// Bounded wait for queue space, in milliseconds
    pub enqueue_timeout_ms: u64,
    /// Record store file
    pub store_path: PathBuf,
    /// Optional pricing override file
    pub pricing_path: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (text/json)
    pub format: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8877,
                max_peek_bytes: 10 * 1024 * 1024,
            },
            upstream: UpstreamConfig {
                anthropic_url: "https://api.anthropic.com".to_string(),
                openai_url: "https://api.z.ai".to_string(),
                connect_timeout: 10,
                read_timeout: 300,
                identity_encoding: true,
                use_system_proxy: true,
            },
            parsing: ParsingConfig {
                max_buffer_bytes: 8 * 1024 * 1024,
                tee_capacity: 256,
            },
            sink: SinkConfig {
                queue_capacity: 1024,
                enqueue_timeout_ms: 100,
                store_path: default_store_path(),
                pricing_path: None,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
            },
        }
    }
}

impl Settings {
    /// Create a configuration instance from the environment
    pub fn new() -> Result<Self> {
        // Load .env file if it exists
        dotenv::dotenv().ok();

        let defaults = Settings::default();

        let settings = Self {
            server: ServerConfig {
                host: get_env_or_default("TOKENWATCH_PROXY_HOST", &defaults.server.host),
                port: get_env_parsed("TOKENWATCH_PROXY_PORT", defaults.server.port)
                    .context("Invalid port number")?,
                max_peek_bytes: get_env_parsed("TOKENWATCH_MAX_PEEK_BYTES", defaults.server.max_peek_bytes)
                    .context("Invalid maximum peek size")?,
            },
            upstream: UpstreamConfig {
                anthropic_url: get_env_or_default("TOKENWATCH_ANTHROPIC_URL", &defaults.upstream.anthropic_url),
                openai_url: get_env_or_default("TOKENWATCH_OPENAI_URL", &defaults.upstream.openai_url),
                connect_timeout: get_env_parsed("TOKENWATCH_CONNECT_TIMEOUT", defaults.upstream.connect_timeout)
                    .context("Invalid connect timeout")?,
                read_timeout: get_env_parsed("TOKENWATCH_READ_TIMEOUT", defaults.upstream.read_timeout)
                    .context("Invalid read timeout")?,
                identity_encoding: get_env_parsed("TOKENWATCH_IDENTITY_ENCODING", defaults.upstream.identity_encoding)
                    .context("Invalid identity encoding flag")?,
                use_system_proxy: get_env_parsed("TOKENWATCH_USE_SYSTEM_PROXY", defaults.upstream.use_system_proxy)
                    .context("Invalid system proxy flag")?,
            },
            parsing: ParsingConfig {
                max_buffer_bytes: get_env_parsed("TOKENWATCH_MAX_PARSE_BUFFER", defaults.parsing.max_buffer_bytes)
                    .context("Invalid parse buffer size")?,
                tee_capacity: get_env_parsed("TOKENWATCH_TEE_CAPACITY", defaults.parsing.tee_capacity)
                    .context("Invalid tee capacity")?,
            },
            sink: SinkConfig {
                queue_capacity: get_env_parsed("TOKENWATCH_SINK_CAPACITY", defaults.sink.queue_capacity)
                    .context("Invalid sink capacity")?,
                enqueue_timeout_ms: get_env_parsed(
                    "TOKENWATCH_SINK_ENQUEUE_TIMEOUT_MS",
                    defaults.sink.enqueue_timeout_ms,
                )
                .context("Invalid sink enqueue timeout")?,
                store_path: std::env::var("TOKENWATCH_DB_PATH")
                    .map(|p| expand_home(&p))
                    .unwrap_or(defaults.sink.store_path),
                pricing_path: std::env::var("TOKENWATCH_PRICING_PATH")
                    .ok()
                    .map(|p| expand_home(&p)),
            },
            logging: LoggingConfig {
                level: get_env_or_default("RUST_LOG", &defaults.logging.level),
                format: get_env_or_default("LOG_FORMAT", &defaults.logging.format),
            },
        };

        // Validate configuration
        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration validity
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            anyhow::bail!("Port number cannot be 0");
        }

        validate_upstream_url("Anthropic", &self.upstream.anthropic_url)?;
        validate_upstream_url("OpenAI", &self.upstream.openai_url)?;

        if self.upstream.connect_timeout == 0 || self.upstream.read_timeout == 0 {
            anyhow::bail!("Timeout values cannot be 0");
        }

        if self.server.max_peek_bytes == 0 || self.parsing.max_buffer_bytes == 0 {
            anyhow::bail!("Buffer limits cannot be 0");
        }

        if self.parsing.tee_capacity == 0 || self.sink.queue_capacity == 0 {
            anyhow::bail!("Channel capacities cannot be 0");
        }

        if self.sink.enqueue_timeout_ms == 0 {
            anyhow::bail!("Sink enqueue timeout cannot be 0");
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            anyhow::bail!("Invalid log level: {}", self.logging.level);
        }

        // Validate log format
        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            anyhow::bail!("Invalid log format: {}", self.logging.format);
        }

        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.connect_timeout)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.read_timeout)
    }

    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.sink.enqueue_timeout_ms)
    }
}

fn validate_upstream_url(name: &str, raw: &str) -> Result<()> {
    let url = Url::parse(raw).with_context(|| format!("Invalid {} upstream URL: {}", name, raw))?;
    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("Invalid {} upstream URL scheme, should be http or https: {}", name, raw);
    }
    if url.host_str().is_none() {
        anyhow::bail!("{} upstream URL has no host: {}", name, raw);
    }
    Ok(())
}

/// Get environment variable or default value
fn get_env_or_default(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Parse an environment variable, falling back to a default when unset
fn get_env_parsed<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", key, raw)),
        Err(_) => Ok(default),
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn default_store_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tokenwatch")
        .join("usage.jsonl")
}
