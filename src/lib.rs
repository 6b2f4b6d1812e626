//! TokenWatch proxy library
//!
//! A localhost reverse proxy for Anthropic-style and OpenAI-compatible APIs
//! that relays traffic unchanged and records token usage and cost

pub mod config;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod utils;

// Re-export common types
pub use config::Settings;
pub use handlers::{create_router, AppState};
pub use models::{Dialect, RecordStatus, TokenUsage, UsageRecord};
pub use services::{PricingTable, RecordSink, RecordStore};
pub use utils::error::{ProxyError, ProxyResult};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Library description
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get version information
pub fn version_info() -> String {
    format!("{} v{} - {}", NAME, VERSION, DESCRIPTION)
}
