//! Runtime configuration.
//!
//! Intentionally minimal: no TOML/YAML parsing dependency, just a plain
//! struct callers build by hand or from environment variables.

use std::env;
use std::time::Duration;

use crate::error::Error;

/// Per-provider credentials and endpoint overrides, read from the process
/// environment.
#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl ProviderConfig {
    /// Reads `{PREFIX}_API_KEY` and `{PREFIX}_BASE_URL` from the process
    /// environment; `base_url` absent means "use the provider's default".
    pub fn from_env(prefix: &str) -> Self {
        Self {
            api_key: env::var(format!("{prefix}_API_KEY")).ok(),
            base_url: env::var(format!("{prefix}_BASE_URL")).ok(),
        }
    }

    pub fn require_api_key(&self, provider: &str) -> Result<&str, Error> {
        self.api_key
            .as_deref()
            .ok_or_else(|| Error::BadParameter(format!("{provider} requires an API key")))
    }
}

/// Process-wide runtime settings: per-provider credentials plus the HTTP and
/// cache tuning knobs every provider shares.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub anthropic: ProviderConfig,
    pub openai: ProviderConfig,
    pub gemini: ProviderConfig,
    pub mistral: ProviderConfig,
    pub http_timeout: Duration,
    pub model_cache_ttl: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            anthropic: ProviderConfig::default(),
            openai: ProviderConfig::default(),
            gemini: ProviderConfig::default(),
            mistral: ProviderConfig::default(),
            http_timeout: Duration::from_secs(300),
            model_cache_ttl: Duration::from_secs(3600),
        }
    }
}

impl RuntimeConfig {
    /// Builds a config from the conventional per-provider environment
    /// variables (`ANTHROPIC_API_KEY`, `OPENAI_API_KEY`, `GEMINI_API_KEY`,
    /// `MISTRAL_API_KEY`, and their `_BASE_URL` counterparts).
    pub fn from_env() -> Self {
        Self {
            anthropic: ProviderConfig::from_env("ANTHROPIC"),
            openai: ProviderConfig::from_env("OPENAI"),
            gemini: ProviderConfig::from_env("GEMINI"),
            mistral: ProviderConfig::from_env("MISTRAL"),
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_api_key_is_reported_with_the_provider_name() {
        let cfg = ProviderConfig::default();
        let err = cfg.require_api_key("anthropic").unwrap_err();
        match err {
            Error::BadParameter(msg) => assert!(msg.contains("anthropic")),
            other => panic!("unexpected error variant: {other:?}"),
        }
    }

    #[test]
    fn default_runtime_config_carries_sane_timeouts() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.http_timeout, Duration::from_secs(300));
        assert_eq!(cfg.model_cache_ttl, Duration::from_secs(3600));
    }
}
