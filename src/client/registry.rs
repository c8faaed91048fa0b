//! Building providers and provider pools from configuration.

use crate::client::{
    AnthropicProvider, GeminiProvider, OpenAiProvider, Provider, ProviderPool, RateLimiter,
    WeightedProvider,
};
use crate::models::{Config, EvalsynthError, ProviderKind, ResolvedProvider, Result};
use std::sync::Arc;
use tracing::info;

/// Construct the client for one resolved provider.
pub fn build_provider(
    settings: &ResolvedProvider,
    rate_limiter: Option<Arc<RateLimiter>>,
) -> Result<Arc<dyn Provider>> {
    let provider: Arc<dyn Provider> = match settings.kind {
        ProviderKind::OpenAi | ProviderKind::Grok => {
            Arc::new(OpenAiProvider::new(settings, rate_limiter)?)
        }
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(settings, rate_limiter)?),
        ProviderKind::Gemini => Arc::new(GeminiProvider::new(settings, rate_limiter)?),
    };
    Ok(provider)
}

/// Providers selected for a run, with their resolved settings.
pub struct ProviderRegistry {
    entries: Vec<(ResolvedProvider, Arc<dyn Provider>)>,
}

impl ProviderRegistry {
    /// Resolve and build every provider in `kinds`, in order.
    ///
    /// Duplicate kinds are ignored. Fails on the first provider whose API key
    /// or model cannot be resolved.
    pub fn from_config(config: &Config, kinds: &[ProviderKind]) -> Result<Self> {
        if kinds.is_empty() {
            return Err(EvalsynthError::InvalidInput(
                "at least one provider must be selected".to_string(),
            ));
        }

        let mut entries: Vec<(ResolvedProvider, Arc<dyn Provider>)> = Vec::new();
        for &kind in kinds {
            if entries.iter().any(|(settings, _)| settings.kind == kind) {
                continue;
            }
            let settings = config.resolve_provider(kind)?;
            let provider = build_provider(&settings, Some(Arc::new(RateLimiter::new())))?;
            info!(
                provider = %kind,
                model = %settings.model,
                base_url = %settings.base_url,
                weight = settings.weight,
                "Provider configured"
            );
            entries.push((settings, provider));
        }

        Ok(Self { entries })
    }

    pub fn get(&self, kind: ProviderKind) -> Option<&Arc<dyn Provider>> {
        self.entries
            .iter()
            .find(|(settings, _)| settings.kind == kind)
            .map(|(_, provider)| provider)
    }

    pub fn settings(&self) -> impl Iterator<Item = &ResolvedProvider> {
        self.entries.iter().map(|(settings, _)| settings)
    }

    /// Weighted pool over every registered provider.
    pub fn pool(&self) -> Result<ProviderPool> {
        ProviderPool::new(
            self.entries
                .iter()
                .map(|(settings, provider)| WeightedProvider {
                    provider: Arc::clone(provider),
                    weight: settings.weight,
                })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConfigError;

    fn config() -> Config {
        Config::from_toml_str(
            r#"
[providers.openai]
api_key = "sk-1"
model = "gpt-x"
weight = 3

[providers.anthropic]
api_key = "ak-1"
model = "claude-x"
base_url = "http://localhost:9999/"
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_builds_pool_in_selection_order() {
        let registry = ProviderRegistry::from_config(
            &config(),
            &[
                ProviderKind::Anthropic,
                ProviderKind::OpenAi,
                ProviderKind::Anthropic,
            ],
        )
        .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.get(ProviderKind::Anthropic).unwrap().model(),
            "claude-x"
        );
        assert!(registry.get(ProviderKind::Gemini).is_none());

        let pool = registry.pool().unwrap();
        assert_eq!(pool.label(), "anthropic+openai");
        let picks: Vec<&str> = (0..4).map(|i| pool.select(i).name()).collect();
        assert_eq!(picks, vec!["anthropic", "openai", "openai", "openai"]);

        let anthropic = registry.settings().next().unwrap();
        assert_eq!(anthropic.base_url, "http://localhost:9999");
    }

    #[test]
    fn test_missing_credentials_fail() {
        let config = Config::from_toml_str(
            r#"
[providers.gemini]
api_key_env = "EVALSYNTH_TEST_REGISTRY_UNSET_KEY"
model = "gemini-x"
"#,
        )
        .unwrap();
        let err = ProviderRegistry::from_config(&config, &[ProviderKind::Gemini])
            .err()
            .unwrap();
        assert!(matches!(
            err,
            EvalsynthError::Config(ConfigError::MissingApiKey { .. })
        ));
    }

    #[test]
    fn test_empty_selection_is_rejected() {
        assert!(ProviderRegistry::from_config(&config(), &[]).is_err());
    }
}
