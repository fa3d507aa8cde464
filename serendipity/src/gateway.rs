use std::sync::Arc;
use tracing::debug;

use crate::catalog;
use crate::error::GatewayError;
use crate::llm::{LlmProvider, LlmRequest, LlmResponse};

/// Source of raw search text for an aggregation run, one call per catalog entry.
#[async_trait::async_trait]
pub trait SearchSource: Send + Sync {
    fn query_count(&self) -> usize;

    /// Text output for catalog entry `index`.
    async fn search(&self, index: usize) -> Result<String, GatewayError>;
}

/// Issues catalog searches through the language model's web search tool.
#[derive(Clone)]
pub struct SearchGateway {
    provider: Option<Arc<dyn LlmProvider>>,
    max_tokens: usize,
}

impl SearchGateway {
    /// `provider` is `None` when no API key is configured; every call then
    /// fails with [`GatewayError::Configuration`].
    pub fn new(provider: Option<Arc<dyn LlmProvider>>, max_tokens: usize) -> Self {
        Self {
            provider,
            max_tokens,
        }
    }

    /// One outbound search for catalog entry `index`, returning the full upstream reply.
    pub async fn query(&self, index: usize) -> Result<LlmResponse, GatewayError> {
        let query = catalog::query(index).ok_or(GatewayError::InvalidIndex)?;
        let provider = self.provider.as_ref().ok_or(GatewayError::Configuration)?;

        debug!(index, query, "issuing catalog search");
        provider
            .generate(LlmRequest {
                prompt: catalog::search_prompt(query),
                max_tokens: Some(self.max_tokens),
                web_search: true,
                ..Default::default()
            })
            .await
            .map_err(|e| GatewayError::Upstream(format!("{:#}", e)))
    }
}

#[async_trait::async_trait]
impl SearchSource for SearchGateway {
    fn query_count(&self) -> usize {
        catalog::len()
    }

    async fn search(&self, index: usize) -> Result<String, GatewayError> {
        Ok(self.query(index).await?.content)
    }
}
