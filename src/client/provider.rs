//! The provider capability and weighted provider pools.

use crate::models::{EvalsynthError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// A model provider that turns a prompt pair into free text.
///
/// Implementations own their transport, credentials and retry policy. The
/// orchestrator only ever calls [`Provider::generate`].
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider name used in logs and file names (`openai`, `anthropic`, ...).
    fn name(&self) -> &str;

    /// Model the provider is configured to call.
    fn model(&self) -> &str;

    async fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f64,
        max_tokens: u32,
    ) -> Result<String>;
}

/// A provider together with its dispatch weight.
#[derive(Clone)]
pub struct WeightedProvider {
    pub provider: Arc<dyn Provider>,
    pub weight: u32,
}

/// Weighted set of providers that batch windows are dispatched to.
///
/// Selection is a deterministic weighted round-robin over the window index:
/// with weights `[2, 1]` windows go A, A, B, A, A, B, ...
#[derive(Clone)]
pub struct ProviderPool {
    providers: Vec<WeightedProvider>,
    total_weight: u64,
}

impl ProviderPool {
    pub fn new(providers: Vec<WeightedProvider>) -> Result<Self> {
        if providers.is_empty() {
            return Err(EvalsynthError::InvalidInput(
                "provider pool needs at least one provider".to_string(),
            ));
        }
        if let Some(p) = providers.iter().find(|p| p.weight == 0) {
            return Err(EvalsynthError::InvalidInput(format!(
                "provider '{}' has weight 0",
                p.provider.name()
            )));
        }
        let total_weight = providers.iter().map(|p| u64::from(p.weight)).sum();
        Ok(Self {
            providers,
            total_weight,
        })
    }

    /// Pool with a single provider.
    pub fn single(provider: Arc<dyn Provider>) -> Self {
        Self {
            providers: vec![WeightedProvider {
                provider,
                weight: 1,
            }],
            total_weight: 1,
        }
    }

    /// Provider for the window at `index` (0-based).
    pub fn select(&self, index: usize) -> &Arc<dyn Provider> {
        let mut slot = index as u64 % self.total_weight;
        for entry in &self.providers {
            let weight = u64::from(entry.weight);
            if slot < weight {
                return &entry.provider;
            }
            slot -= weight;
        }
        // Unreachable while total_weight is the sum of the weights
        &self.providers[0].provider
    }

    pub fn providers(&self) -> &[WeightedProvider] {
        &self.providers
    }

    /// Provider names joined with `+`, e.g. `openai+grok`.
    pub fn label(&self) -> String {
        self.providers
            .iter()
            .map(|p| p.provider.name())
            .collect::<Vec<_>>()
            .join("+")
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named(&'static str);

    #[async_trait]
    impl Provider for Named {
        fn name(&self) -> &str {
            self.0
        }

        fn model(&self) -> &str {
            "test-model"
        }

        async fn generate(&self, _: &str, _: &str, _: f64, _: u32) -> Result<String> {
            Ok(String::new())
        }
    }

    fn weighted(name: &'static str, weight: u32) -> WeightedProvider {
        WeightedProvider {
            provider: Arc::new(Named(name)),
            weight,
        }
    }

    #[test]
    fn test_weighted_round_robin() {
        let pool = ProviderPool::new(vec![weighted("a", 2), weighted("b", 1)]).unwrap();
        let picks: Vec<&str> = (0..7).map(|i| pool.select(i).name()).collect();
        assert_eq!(picks, vec!["a", "a", "b", "a", "a", "b", "a"]);
        assert_eq!(pool.label(), "a+b");
    }

    #[test]
    fn test_single_provider_always_selected() {
        let pool = ProviderPool::single(Arc::new(Named("only")));
        assert!((0..5).all(|i| pool.select(i).name() == "only"));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_invalid_pools_are_rejected() {
        assert!(ProviderPool::new(vec![]).is_err());
        assert!(ProviderPool::new(vec![weighted("a", 1), weighted("b", 0)]).is_err());
    }
}
