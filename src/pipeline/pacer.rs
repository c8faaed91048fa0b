//! Per-provider cooldown between batch requests.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Keeps consecutive requests to the same provider at least `cooldown`
/// apart, measured from the previous dispatch and from the previous
/// completion.
///
/// Each provider has its own gate; waiting on one never delays another.
#[derive(Debug)]
pub struct ProviderPacer {
    cooldown: Duration,
    gates: DashMap<String, Arc<Mutex<Option<Instant>>>>,
}

impl ProviderPacer {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            gates: DashMap::new(),
        }
    }

    fn gate(&self, provider: &str) -> Arc<Mutex<Option<Instant>>> {
        Arc::clone(&*self.gates.entry(provider.to_string()).or_default())
    }

    /// Wait until `provider` may be called, then claim the slot.
    ///
    /// Returns how long the caller waited.
    pub async fn acquire(&self, provider: &str) -> Duration {
        let gate = self.gate(provider);
        let mut ready_at = gate.lock().await;

        let started = Instant::now();
        if let Some(at) = *ready_at {
            tokio::time::sleep_until(at).await;
        }
        let now = Instant::now();
        *ready_at = Some(now + self.cooldown);
        now - started
    }

    /// Record that a request to `provider` finished.
    pub async fn release(&self, provider: &str) {
        let gate = self.gate(provider);
        let mut ready_at = gate.lock().await;
        let after_completion = Instant::now() + self.cooldown;
        *ready_at = Some(ready_at.map_or(after_completion, |at| at.max(after_completion)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_first_call_does_not_wait() {
        let pacer = ProviderPacer::new(Duration::from_secs(2));
        assert_eq!(pacer.acquire("a").await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_runs_from_completion() {
        let pacer = ProviderPacer::new(Duration::from_secs(2));
        pacer.acquire("a").await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        pacer.release("a").await;

        let started = Instant::now();
        let waited = pacer.acquire("a").await;
        assert_eq!(waited, Duration::from_secs(2));
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_runs_from_dispatch() {
        let pacer = ProviderPacer::new(Duration::from_secs(2));
        let t0 = Instant::now();
        pacer.acquire("a").await;
        pacer.acquire("a").await;
        pacer.acquire("a").await;
        assert_eq!(t0.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_providers_are_independent() {
        let pacer = ProviderPacer::new(Duration::from_secs(10));
        pacer.acquire("a").await;
        pacer.release("a").await;
        assert_eq!(pacer.acquire("b").await, Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_cooldown_never_waits() {
        let pacer = ProviderPacer::new(Duration::ZERO);
        pacer.acquire("a").await;
        pacer.release("a").await;
        assert_eq!(pacer.acquire("a").await, Duration::ZERO);
    }
}
