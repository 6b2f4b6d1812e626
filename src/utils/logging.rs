//! Logging utilities
//!
//! Subscriber setup and the per-record summary line

use crate::config::settings::LoggingConfig;
use crate::models::{RecordStatus, UsageRecord};
use anyhow::{Context, Result};
use tracing::{info, warn};

/// Initialize logging system
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let subscriber: Box<dyn tracing::Subscriber + Send + Sync> = if config.format == "json" {
        // JSON format logs (production environment)
        Box::new(
            tracing_subscriber::fmt()
                .with_env_filter(config.level.as_str())
                .json()
                .with_current_span(false)
                .with_span_list(false)
                .finish(),
        )
    } else {
        // Human readable format (development environment)
        Box::new(
            tracing_subscriber::fmt()
                .with_env_filter(config.level.as_str())
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .finish(),
        )
    };

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    info!("Logging system initialized");
    Ok(())
}

/// Format a cost for log output; unknown pricing shows as `?`
pub fn format_cost(record: &UsageRecord) -> String {
    match record.cost {
        Some(cost) => format!("${}", cost),
        None => "?".to_string(),
    }
}

/// Emit the one-line summary of a finished request
pub fn log_record(record: &UsageRecord) {
    let kind = if record.streamed { "STREAM" } else { "REQ" };
    let model = if record.model.is_empty() { "-" } else { record.model.as_str() };

    if record.status == RecordStatus::Success {
        info!(
            "{} {} model={} in={} out={} cache_read={} cache_write={} cost={} latency={}ms",
            kind,
            record.dialect,
            model,
            record.input_tokens,
            record.output_tokens,
            record.cache_read_tokens,
            record.cache_write_tokens,
            format_cost(record),
            record.latency.as_millis(),
        );
    } else {
        warn!(
            "{} {} model={} in={} out={} cost={} latency={}ms status={} http_status={:?}",
            kind,
            record.dialect,
            model,
            record.input_tokens,
            record.output_tokens,
            format_cost(record),
            record.latency.as_millis(),
            record.status,
            record.http_status,
        );
    }
}
