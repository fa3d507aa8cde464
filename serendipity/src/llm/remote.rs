use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{LlmProvider, LlmRequest, LlmResponse, UsageMetadata};

const WEB_SEARCH_TOOL_TYPE: &str = "web_search_20250305";

/// Remote LLM provider speaking the Anthropic Messages HTTP API
pub struct AnthropicProvider {
    base_url: String,
    api_key: String,
    model: String,
    api_version: String,
    default_timeout: Duration,
    default_max_tokens: usize,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            api_version: common::DEFAULT_ANTHROPIC_VERSION.to_string(),
            default_timeout: Duration::from_secs(120),
            default_max_tokens: 2000,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_defaults(mut self, timeout: Duration, max_tokens: usize) -> Self {
        self.default_timeout = timeout;
        self.default_max_tokens = max_tokens;
        self
    }

    pub fn with_api_version(mut self, version: impl Into<String>) -> Self {
        self.api_version = version.into();
        self
    }

    /// Build a provider from the `[llm]` section and a resolved API key.
    pub fn from_config(cfg: &common::LlmConfig, api_key: impl Into<String>) -> Self {
        Self::new(cfg.api_url(), api_key, cfg.model())
            .with_api_version(cfg.anthropic_version())
            .with_defaults(cfg.timeout(), cfg.digest_max_tokens())
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait::async_trait]
impl LlmProvider for AnthropicProvider {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse> {
        let tools = if request.web_search {
            vec![Tool {
                kind: WEB_SEARCH_TOOL_TYPE.to_string(),
                name: "web_search".to_string(),
            }]
        } else {
            Vec::new()
        };

        let req_body = MessagesRequest {
            model: self.model.clone(),
            max_tokens: request.max_tokens.unwrap_or(self.default_max_tokens),
            messages: vec![Message {
                role: "user".to_string(),
                content: request.prompt,
            }],
            tools,
        };

        // The whole exchange (headers and body) must complete within the timeout.
        let (status, body) = tokio::time::timeout(self.default_timeout, async {
            let response = self
                .client
                .post(&self.base_url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", &self.api_version)
                .header("content-type", "application/json")
                .json(&req_body)
                .send()
                .await
                .context("LLM HTTP request failed")?;
            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read LLM response body")?;
            Ok::<_, anyhow::Error>((status, body))
        })
        .await
        .context("LLM request timed out")??;

        if !status.is_success() {
            anyhow::bail!("LLM API error {}: {}", status, body);
        }

        let resp_body: MessagesResponse = serde_json::from_str(&body)
            .context("Failed to parse LLM response")?;

        let content = resp_body
            .content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n");

        let usage = resp_body
            .usage
            .map(|u| UsageMetadata {
                input_tokens: u.input_tokens.unwrap_or(0),
                output_tokens: u.output_tokens.unwrap_or(0),
            })
            .unwrap_or_default();

        Ok(LlmResponse {
            content,
            raw: body,
            usage,
            model: resp_body.model.unwrap_or_else(|| self.model.clone()),
        })
    }
}

// Anthropic Messages API request/response structures
#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: usize,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct Tool {
    #[serde(rename = "type")]
    kind: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<Usage>,
}

/// Only text blocks matter here; tool use and search result blocks are skipped.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: Option<usize>,
    #[serde(default)]
    output_tokens: Option<usize>,
}
