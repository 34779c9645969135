use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;

use concord_core::{Breaker, BreakerConfig, BreakerState};

/// One [`Breaker`] per upstream provider (§4.5 resilience: "per-provider
/// circuit breaker"), lazily created on first use. A single `Mutex`-guarded
/// map is enough here — the breaker check is in the same request path as
/// the upstream call, never a hot inner loop like the gateway's per-shard
/// publish retries.
pub struct ProviderBreakers {
    window_requests: usize,
    error_rate_threshold: f64,
    cooldown: Duration,
    breakers: Mutex<HashMap<String, Breaker>>,
}

impl ProviderBreakers {
    pub fn new(window_requests: u32, error_rate_threshold: f64, cooldown: Duration) -> Self {
        Self {
            window_requests: window_requests as usize,
            error_rate_threshold,
            cooldown,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub async fn allow(&self, provider: &str) -> bool {
        let mut guard = self.breakers.lock().await;
        guard.entry(provider.to_string()).or_insert_with(|| self.fresh_breaker()).allow()
    }

    /// Current state of `provider`'s breaker, or `None` if no call has
    /// touched it yet — queried by the admin RPC surface's
    /// `getBreakerState` method, never on the request hot path.
    pub async fn state(&self, provider: &str) -> Option<BreakerState> {
        self.breakers.lock().await.get(provider).map(|b| b.state())
    }

    pub async fn record(&self, provider: &str, is_error: bool) {
        let mut guard = self.breakers.lock().await;
        guard
            .entry(provider.to_string())
            .or_insert_with(|| self.fresh_breaker())
            .record(is_error);
    }

    fn fresh_breaker(&self) -> Breaker {
        Breaker::new(BreakerConfig {
            window_size: self.window_requests,
            error_rate_threshold: self.error_rate_threshold,
            cooldown: self.cooldown,
        })
    }
}
