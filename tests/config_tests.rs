//! Configuration loading tests

use std::env;
use std::path::PathBuf;
use std::sync::Mutex;
use tokenwatch::config::Settings;

/// Settings::new reads process-wide environment variables
static ENV_LOCK: Mutex<()> = Mutex::new(());

const VARS: &[&str] = &[
    "TOKENWATCH_PROXY_HOST",
    "TOKENWATCH_PROXY_PORT",
    "TOKENWATCH_MAX_PEEK_BYTES",
    "TOKENWATCH_ANTHROPIC_URL",
    "TOKENWATCH_OPENAI_URL",
    "TOKENWATCH_CONNECT_TIMEOUT",
    "TOKENWATCH_READ_TIMEOUT",
    "TOKENWATCH_IDENTITY_ENCODING",
    "TOKENWATCH_USE_SYSTEM_PROXY",
    "TOKENWATCH_MAX_PARSE_BUFFER",
    "TOKENWATCH_TEE_CAPACITY",
    "TOKENWATCH_SINK_CAPACITY",
    "TOKENWATCH_SINK_ENQUEUE_TIMEOUT_MS",
    "TOKENWATCH_DB_PATH",
    "TOKENWATCH_PRICING_PATH",
    "RUST_LOG",
    "LOG_FORMAT",
];

fn cleanup_test_env() {
    for var in VARS {
        env::remove_var(var);
    }
}

fn with_env<T>(pairs: &[(&str, &str)], f: impl FnOnce() -> T) -> T {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    cleanup_test_env();
    for (key, value) in pairs {
        env::set_var(key, value);
    }
    let result = f();
    cleanup_test_env();
    result
}

#[test]
fn test_settings_from_env() {
    let settings = with_env(
        &[
            ("TOKENWATCH_PROXY_HOST", "0.0.0.0"),
            ("TOKENWATCH_PROXY_PORT", "9999"),
            ("TOKENWATCH_ANTHROPIC_URL", "https://api.z.ai/api/anthropic"),
            ("TOKENWATCH_OPENAI_URL", "https://api.deepseek.com"),
            ("TOKENWATCH_READ_TIMEOUT", "600"),
            ("TOKENWATCH_IDENTITY_ENCODING", "false"),
            ("TOKENWATCH_SINK_CAPACITY", "32"),
            ("TOKENWATCH_DB_PATH", "/tmp/tokenwatch-test/usage.jsonl"),
            ("RUST_LOG", "debug"),
            ("LOG_FORMAT", "json"),
        ],
        Settings::new,
    )
    .unwrap();

    assert_eq!(settings.listen_addr(), "0.0.0.0:9999");
    assert_eq!(settings.upstream.anthropic_url, "https://api.z.ai/api/anthropic");
    assert_eq!(settings.upstream.openai_url, "https://api.deepseek.com");
    assert_eq!(settings.upstream.read_timeout, 600);
    assert!(!settings.upstream.identity_encoding);
    assert_eq!(settings.sink.queue_capacity, 32);
    assert_eq!(settings.sink.store_path, PathBuf::from("/tmp/tokenwatch-test/usage.jsonl"));
    assert_eq!(settings.logging.level, "debug");
    assert_eq!(settings.logging.format, "json");
}

#[test]
fn test_settings_defaults_without_env() {
    let settings = with_env(&[], Settings::new).unwrap();
    let defaults = Settings::default();

    assert_eq!(settings.server.port, defaults.server.port);
    assert_eq!(settings.upstream.anthropic_url, "https://api.anthropic.com");
    assert_eq!(settings.sink.enqueue_timeout_ms, 100);
    assert_eq!(settings.parsing.max_buffer_bytes, 8 * 1024 * 1024);
    assert!(settings.upstream.use_system_proxy);
    assert!(settings.sink.pricing_path.is_none());
}

#[test]
fn test_invalid_port_is_rejected() {
    let result = with_env(&[("TOKENWATCH_PROXY_PORT", "not-a-port")], Settings::new);
    assert!(result.is_err());

    let result = with_env(&[("TOKENWATCH_PROXY_PORT", "0")], Settings::new);
    assert!(result.is_err());
}

#[test]
fn test_invalid_upstream_url_is_rejected() {
    let result = with_env(&[("TOKENWATCH_OPENAI_URL", "localhost:11434")], Settings::new);
    assert!(result.is_err());
}

#[test]
fn test_invalid_log_settings_are_rejected() {
    assert!(with_env(&[("RUST_LOG", "verbose")], Settings::new).is_err());
    assert!(with_env(&[("LOG_FORMAT", "xml")], Settings::new).is_err());
}

#[test]
fn test_zero_limits_are_rejected() {
    assert!(with_env(&[("TOKENWATCH_SINK_CAPACITY", "0")], Settings::new).is_err());
    assert!(with_env(&[("TOKENWATCH_SINK_ENQUEUE_TIMEOUT_MS", "0")], Settings::new).is_err());
    assert!(with_env(&[("TOKENWATCH_MAX_PARSE_BUFFER", "0")], Settings::new).is_err());
}
