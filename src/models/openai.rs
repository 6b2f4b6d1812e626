//! OpenAI-compatible Chat Completions wire shapes

use super::UsagePatch;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PromptTokensDetails {
    #[serde(default, deserialize_with = "crate::models::lenient::count")]
    pub cached_tokens: Option<u64>,
}

/// `usage` object of a completion or of the final stream chunk
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAIUsage {
    #[serde(default, deserialize_with = "crate::models::lenient::count")]
    pub prompt_tokens: Option<u64>,
    #[serde(default, deserialize_with = "crate::models::lenient::count")]
    pub completion_tokens: Option<u64>,
    #[serde(default, deserialize_with = "crate::models::lenient::count")]
    pub total_tokens: Option<u64>,
    #[serde(default, deserialize_with = "crate::models::lenient::object")]
    pub prompt_tokens_details: Option<PromptTokensDetails>,
    /// DeepSeek-style cache accounting
    #[serde(default, deserialize_with = "crate::models::lenient::count")]
    pub prompt_cache_hit_tokens: Option<u64>,
}

impl From<OpenAIUsage> for UsagePatch {
    fn from(usage: OpenAIUsage) -> Self {
        let cached = usage
            .prompt_tokens_details
            .and_then(|details| details.cached_tokens)
            .or(usage.prompt_cache_hit_tokens);

        UsagePatch {
            input_tokens: usage.prompt_tokens,
            output_tokens: usage.completion_tokens,
            cache_read_tokens: cached,
            cache_write_tokens: None,
        }
    }
}

/// Non-streaming completion body and streaming chunk share this shape
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OpenAICompletion {
    #[serde(default, deserialize_with = "crate::models::lenient::string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "crate::models::lenient::string")]
    pub model: Option<String>,
    #[serde(default, deserialize_with = "crate::models::lenient::object")]
    pub usage: Option<OpenAIUsage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_with_cached_tokens() {
        let data = r#"{"prompt_tokens":150,"completion_tokens":80,"total_tokens":230,"prompt_tokens_details":{"cached_tokens":64}}"#;
        let usage: OpenAIUsage = serde_json::from_str(data).unwrap();
        let patch = UsagePatch::from(usage);

        assert_eq!(patch.input_tokens, Some(150));
        assert_eq!(patch.output_tokens, Some(80));
        assert_eq!(patch.cache_read_tokens, Some(64));
        assert_eq!(patch.cache_write_tokens, None);
    }

    #[test]
    fn test_chunk_with_null_usage() {
        let data = r#"{"id":"chatcmpl-x","model":"glm-4.7","choices":[{"delta":{"content":"Hi"}}],"usage":null}"#;
        let chunk: OpenAICompletion = serde_json::from_str(data).unwrap();
        assert_eq!(chunk.model.as_deref(), Some("glm-4.7"));
        assert!(chunk.usage.is_none());
    }

    #[test]
    fn test_float_and_string_counts() {
        let data = r#"{"id":"chatcmpl-y","model":["gpt-4o"],"usage":{"prompt_tokens":"150","completion_tokens":80.0,"prompt_tokens_details":{"cached_tokens":1.0}}}"#;
        let completion: OpenAICompletion = serde_json::from_str(data).unwrap();
        assert_eq!(completion.id.as_deref(), Some("chatcmpl-y"));
        assert_eq!(completion.model, None);

        let patch = UsagePatch::from(completion.usage.unwrap());
        assert_eq!(patch.input_tokens, Some(150));
        assert_eq!(patch.output_tokens, Some(80));
        assert_eq!(patch.cache_read_tokens, Some(1));
    }

    #[test]
    fn test_fractional_count_is_dropped() {
        let data = r#"{"prompt_tokens":10,"completion_tokens":2.5,"prompt_tokens_details":"none","prompt_cache_hit_tokens":4}"#;
        let patch = UsagePatch::from(serde_json::from_str::<OpenAIUsage>(data).unwrap());
        assert_eq!(patch.input_tokens, Some(10));
        assert_eq!(patch.output_tokens, None);
        assert_eq!(patch.cache_read_tokens, Some(4));
    }
}
