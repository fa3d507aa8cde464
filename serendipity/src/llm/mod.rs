use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Core trait for language-model providers
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run one completion for a single user prompt
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse>;
}

/// Request structure for LLM generation
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub prompt: String,
    pub max_tokens: Option<usize>,
    /// Let the model call the provider's hosted web search tool
    pub web_search: bool,
}

/// Response from LLM generation
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// Text blocks of the reply joined with newlines
    pub content: String,
    /// Upstream body exactly as received
    pub raw: String,
    pub usage: UsageMetadata,
    /// Model that answered, as reported upstream
    pub model: String,
}

/// Token usage metadata
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

pub mod remote;
