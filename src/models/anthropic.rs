//! Anthropic Messages API wire shapes
//!
//! Only the parts that carry usage or the model identifier are modelled.
//! Everything else in a payload is ignored.

use super::UsagePatch;
use serde::Deserialize;

/// `usage` object of a message or a `message_delta` event
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnthropicUsage {
    #[serde(default, deserialize_with = "crate::models::lenient::count")]
    pub input_tokens: Option<u64>,
    #[serde(default, deserialize_with = "crate::models::lenient::count")]
    pub output_tokens: Option<u64>,
    #[serde(default, deserialize_with = "crate::models::lenient::count")]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default, deserialize_with = "crate::models::lenient::count")]
    pub cache_read_input_tokens: Option<u64>,
}

impl From<AnthropicUsage> for UsagePatch {
    fn from(usage: AnthropicUsage) -> Self {
        UsagePatch {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            cache_read_tokens: usage.cache_read_input_tokens,
            cache_write_tokens: usage.cache_creation_input_tokens,
        }
    }
}

/// Non-streaming response body (also matches the message inside `message_start`)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnthropicMessage {
    #[serde(default, deserialize_with = "crate::models::lenient::string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "crate::models::lenient::string")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "crate::models::lenient::object")]
    pub usage: Option<AnthropicUsage>,
}

/// Server-sent event payload, discriminated by its `type` field
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicStreamEvent {
    MessageStart {
        message: AnthropicMessage,
    },
    ContentBlockStart,
    ContentBlockDelta,
    ContentBlockStop,
    MessageDelta {
        #[serde(default, deserialize_with = "crate::models::lenient::object")]
        usage: Option<AnthropicUsage>,
    },
    MessageStop,
    Ping,
    Error,
    #[serde(other)]
    Unknown,
}
