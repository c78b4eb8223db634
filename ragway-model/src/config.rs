//! Gateway configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::gateway::{Gateway, RetryPolicy};

/// Settings used to assemble a [`Gateway`].
///
/// A backend is registered only when its credential (or URL, for Ollama) is
/// present and its cargo feature is enabled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// OpenAI API key.
    pub openai_api_key: Option<String>,
    /// Base URL for OpenAI-compatible APIs.
    pub openai_base_url: Option<String>,
    /// Anthropic API key.
    pub anthropic_api_key: Option<String>,
    /// Ollama server URL.
    pub ollama_url: Option<String>,
    /// Backend used when a request names none.
    pub default_backend: String,
    /// Model used when a request leaves the model empty.
    pub default_model: String,
    /// Backend tried after the selected backend exhausts its retries.
    pub fallback_backend: Option<String>,
    /// Model substituted for fallback attempts.
    pub fallback_model: Option<String>,
    /// Additional attempts after the first.
    pub max_retries: u32,
    /// Unit of the quadratic retry backoff, in milliseconds.
    pub retry_base_delay_ms: u64,
    /// HTTP timeout for a single backend call, in seconds.
    pub request_timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: None,
            anthropic_api_key: None,
            ollama_url: None,
            default_backend: "openai".to_string(),
            default_model: "gpt-4o-mini".to_string(),
            fallback_backend: None,
            fallback_model: None,
            max_retries: 3,
            retry_base_delay_ms: 500,
            request_timeout_secs: 300,
        }
    }
}

impl GatewayConfig {
    /// Create a new builder for constructing a [`GatewayConfig`].
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    /// Read the configuration from environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `OPENAI_API_KEY` | `openai_api_key` |
    /// | `OPENAI_BASE_URL` | `openai_base_url` |
    /// | `ANTHROPIC_API_KEY` | `anthropic_api_key` |
    /// | `OLLAMA_URL` | `ollama_url` |
    /// | `LLM_DEFAULT_PROVIDER` | `default_backend` |
    /// | `LLM_DEFAULT_MODEL` | `default_model` |
    /// | `LLM_FALLBACK_PROVIDER` | `fallback_backend` |
    /// | `LLM_FALLBACK_MODEL` | `fallback_model` |
    /// | `LLM_MAX_RETRIES` | `max_retries` |
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup. Empty values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let max_retries = match get("LLM_MAX_RETRIES") {
            Some(raw) => raw.trim().parse().map_err(|e| {
                ModelError::Config(format!("invalid LLM_MAX_RETRIES '{raw}': {e}"))
            })?,
            None => defaults.max_retries,
        };

        Ok(Self {
            openai_api_key: get("OPENAI_API_KEY"),
            openai_base_url: get("OPENAI_BASE_URL"),
            anthropic_api_key: get("ANTHROPIC_API_KEY"),
            ollama_url: get("OLLAMA_URL"),
            default_backend: get("LLM_DEFAULT_PROVIDER").unwrap_or(defaults.default_backend),
            default_model: get("LLM_DEFAULT_MODEL").unwrap_or(defaults.default_model),
            fallback_backend: get("LLM_FALLBACK_PROVIDER"),
            fallback_model: get("LLM_FALLBACK_MODEL"),
            max_retries,
            ..defaults
        })
    }

    /// The retry policy described by this configuration.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    /// Register every configured backend and build the gateway.
    pub fn build_gateway(&self) -> Result<Gateway> {
        let timeout = Duration::from_secs(self.request_timeout_secs);
        #[allow(unused_mut)]
        let mut builder = Gateway::builder()
            .default_backend(self.default_backend.clone())
            .default_model(self.default_model.clone())
            .retry_policy(self.retry_policy());

        #[cfg(feature = "openai")]
        if let Some(key) = &self.openai_api_key {
            let backend =
                crate::openai::OpenAiBackend::new(key, self.openai_base_url.as_deref(), timeout)?;
            builder = builder.backend(std::sync::Arc::new(backend));
        }
        #[cfg(feature = "anthropic")]
        if let Some(key) = &self.anthropic_api_key {
            let backend = crate::anthropic::AnthropicBackend::new(key, timeout)?;
            builder = builder.backend(std::sync::Arc::new(backend));
        }
        #[cfg(feature = "ollama")]
        if let Some(url) = &self.ollama_url {
            let backend = crate::ollama::OllamaBackend::new(url, timeout)?;
            builder = builder.backend(std::sync::Arc::new(backend));
        }
        let _ = timeout;

        if let Some(fallback) = &self.fallback_backend {
            builder = builder.fallback_backend(fallback.clone());
        }
        if let Some(model) = &self.fallback_model {
            builder = builder.fallback_model(model.clone());
        }
        builder.build()
    }
}

/// Builder for constructing a validated [`GatewayConfig`].
#[derive(Debug, Clone, Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    /// Set the OpenAI API key.
    pub fn openai_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.openai_api_key = Some(key.into());
        self
    }

    /// Set the base URL for an OpenAI-compatible API.
    pub fn openai_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.openai_base_url = Some(url.into());
        self
    }

    /// Set the Anthropic API key.
    pub fn anthropic_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.anthropic_api_key = Some(key.into());
        self
    }

    /// Set the Ollama server URL.
    pub fn ollama_url(mut self, url: impl Into<String>) -> Self {
        self.config.ollama_url = Some(url.into());
        self
    }

    /// Set the default backend.
    pub fn default_backend(mut self, name: impl Into<String>) -> Self {
        self.config.default_backend = name.into();
        self
    }

    /// Set the default model.
    pub fn default_model(mut self, model: impl Into<String>) -> Self {
        self.config.default_model = model.into();
        self
    }

    /// Set the fallback backend.
    pub fn fallback_backend(mut self, name: impl Into<String>) -> Self {
        self.config.fallback_backend = Some(name.into());
        self
    }

    /// Set the fallback model.
    pub fn fallback_model(mut self, model: impl Into<String>) -> Self {
        self.config.fallback_model = Some(model.into());
        self
    }

    /// Set the number of additional attempts after the first.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.config.max_retries = max_retries;
        self
    }

    /// Set the backoff unit in milliseconds.
    pub fn retry_base_delay_ms(mut self, ms: u64) -> Self {
        self.config.retry_base_delay_ms = ms;
        self
    }

    /// Set the per-call HTTP timeout in seconds.
    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    /// Build the [`GatewayConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`ModelError::Config`] if:
    /// - `default_backend` is empty
    /// - `request_timeout_secs == 0`
    pub fn build(self) -> Result<GatewayConfig> {
        if self.config.default_backend.trim().is_empty() {
            return Err(ModelError::Config("default_backend must not be empty".to_string()));
        }
        if self.config.request_timeout_secs == 0 {
            return Err(ModelError::Config(
                "request_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = GatewayConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, GatewayConfig::default());
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_policy().base_delay, Duration::from_millis(500));
    }

    #[test]
    fn reads_backend_settings() {
        let config = GatewayConfig::from_lookup(lookup(&[
            ("ANTHROPIC_API_KEY", "sk-ant"),
            ("LLM_DEFAULT_PROVIDER", "anthropic"),
            ("LLM_FALLBACK_PROVIDER", "ollama"),
            ("LLM_FALLBACK_MODEL", "llama3"),
            ("LLM_MAX_RETRIES", "2"),
            ("OPENAI_API_KEY", "  "),
        ]))
        .unwrap();
        assert_eq!(config.anthropic_api_key.as_deref(), Some("sk-ant"));
        assert_eq!(config.default_backend, "anthropic");
        assert_eq!(config.fallback_backend.as_deref(), Some("ollama"));
        assert_eq!(config.fallback_model.as_deref(), Some("llama3"));
        assert_eq!(config.max_retries, 2);
        assert!(config.openai_api_key.is_none());
    }

    #[test]
    fn rejects_bad_retry_count() {
        let err = GatewayConfig::from_lookup(lookup(&[("LLM_MAX_RETRIES", "many")])).unwrap_err();
        assert!(matches!(err, ModelError::Config(_)));
    }

    #[test]
    fn builder_validates() {
        assert!(GatewayConfig::builder().default_backend("").build().is_err());
        assert!(GatewayConfig::builder().request_timeout_secs(0).build().is_err());
        let config = GatewayConfig::builder().ollama_url("http://localhost:11434").build().unwrap();
        assert_eq!(config.ollama_url.as_deref(), Some("http://localhost:11434"));
    }

    #[test]
    fn build_gateway_without_backends_fails() {
        let err = GatewayConfig::default().build_gateway().unwrap_err();
        assert!(matches!(err, ModelError::Config(_)));
    }
}
