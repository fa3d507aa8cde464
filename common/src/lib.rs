/*!
common/src/lib.rs

Shared configuration types and helpers for Serendipity.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader merging a default file with an optional override file
- Resolution of secrets from the environment variables named in the config
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.anthropic.com/v1/messages";
pub const DEFAULT_API_KEY_ENV: &str = "ANTHROPIC_API_KEY";
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_ADMIN_KEY_ENV: &str = "ADMIN_KEY";
pub const DEFAULT_DELAY_MILLIS: u64 = 400;
pub const DEFAULT_DIGEST_LIMIT: usize = 25;
pub const DEFAULT_SESSION_IDLE_MINUTES: u64 = 120;

/// HTTP bind configuration, merged into Rocket's figment at launch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
}

/// Language-model provider configuration (Anthropic Messages API)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_url: Option<String>,
    /// Name of the environment variable holding the API key
    pub api_key_env: Option<String>,
    pub model: Option<String>,
    pub anthropic_version: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub search_max_tokens: Option<usize>,
    pub digest_max_tokens: Option<usize>,
}

impl LlmConfig {
    pub fn api_url(&self) -> &str {
        self.api_url.as_deref().unwrap_or(DEFAULT_API_URL)
    }

    pub fn api_key_env(&self) -> &str {
        self.api_key_env.as_deref().unwrap_or(DEFAULT_API_KEY_ENV)
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    pub fn anthropic_version(&self) -> &str {
        self.anthropic_version
            .as_deref()
            .unwrap_or(DEFAULT_ANTHROPIC_VERSION)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds.unwrap_or(120))
    }

    pub fn search_max_tokens(&self) -> usize {
        self.search_max_tokens.unwrap_or(4000)
    }

    pub fn digest_max_tokens(&self) -> usize {
        self.digest_max_tokens.unwrap_or(2000)
    }
}

/// Admin access configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdminConfig {
    /// Name of the environment variable holding the admin key
    pub key_env: Option<String>,
}

impl AdminConfig {
    pub fn key_env(&self) -> &str {
        self.key_env.as_deref().unwrap_or(DEFAULT_ADMIN_KEY_ENV)
    }
}

/// Pacing of the sequential search run and digest sizing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AggregationConfig {
    pub delay_millis: Option<u64>,
    pub digest_limit: Option<usize>,
}

impl AggregationConfig {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_millis.unwrap_or(DEFAULT_DELAY_MILLIS))
    }

    pub fn digest_limit(&self) -> usize {
        self.digest_limit.unwrap_or(DEFAULT_DIGEST_LIMIT)
    }
}

/// Lifetime of in-memory reader sessions
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sessions untouched for this long are dropped
    pub idle_minutes: Option<u64>,
}

impl SessionConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_secs(60 * self.idle_minutes.unwrap_or(DEFAULT_SESSION_IDLE_MINUTES))
    }
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
}

impl Config {
    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(
        default_path: Option<&Path>,
        override_path: Option<&Path>,
    ) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if path.exists() {
                let data = tokio::fs::read_to_string(path).await
                    .with_context(|| format!("Failed to read config: {}", path.display()))?;
                let val: toml::Value = toml::from_str(&data)
                    .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
                merge_toml(&mut config_value, val);
            }
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject values that would only fail later at request time.
    pub fn validate(&self) -> Result<()> {
        url::Url::parse(self.llm.api_url())
            .with_context(|| format!("Invalid llm.api_url: {}", self.llm.api_url()))?;
        if self.aggregation.digest_limit() == 0 {
            anyhow::bail!("aggregation.digest_limit must be at least 1");
        }
        if self.sessions.idle_ttl().is_zero() {
            anyhow::bail!("sessions.idle_minutes must be at least 1");
        }
        Ok(())
    }

    /// API key for the language-model provider, if its environment variable is set.
    pub fn llm_api_key(&self) -> Option<String> {
        read_secret(self.llm.api_key_env())
    }

    /// Shared admin key for reading registrations, if configured.
    pub fn admin_key(&self) -> Option<String> {
        read_secret(self.admin.key_env())
    }
}

fn read_secret(var: &str) -> Option<String> {
    std::env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}
