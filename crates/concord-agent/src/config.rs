use std::time::Duration;

use concord_core::constants::{
    AGENT_CONNECT_TIMEOUT_SECS, AGENT_FIRST_BYTE_TIMEOUT_SECS, AGENT_TOTAL_TIMEOUT_SECS,
    JWT_TTL_SECS, PROVIDER_BREAKER_COOLDOWN_SECS, PROVIDER_BREAKER_ERROR_RATE_THRESHOLD,
    PROVIDER_BREAKER_WINDOW_REQUESTS, RECONCILIATION_LOOKBACK_SECS, SHUTDOWN_DRAIN_SECS,
    SIGNING_KEY_OVERLAP_HOURS,
};

/// Tuning knobs for [`crate::gateway::AgentGateway`] (§4.5, §4.5.A). Defaults
/// mirror `concord-core::constants`; the node's config layer overrides these
/// per-deployment the same way `concord_ledger::LedgerConfig` does.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub connect_timeout: Duration,
    pub first_byte_timeout: Duration,
    pub total_timeout: Duration,
    pub jwt_ttl_secs: i64,
    pub signing_key_overlap_hours: i64,
    pub breaker_window_requests: u32,
    pub breaker_error_rate_threshold: f64,
    pub breaker_cooldown: Duration,
    pub shutdown_drain: Duration,
    pub reconciliation_lookback_secs: i64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(AGENT_CONNECT_TIMEOUT_SECS),
            first_byte_timeout: Duration::from_secs(AGENT_FIRST_BYTE_TIMEOUT_SECS),
            total_timeout: Duration::from_secs(AGENT_TOTAL_TIMEOUT_SECS),
            jwt_ttl_secs: JWT_TTL_SECS,
            signing_key_overlap_hours: SIGNING_KEY_OVERLAP_HOURS,
            breaker_window_requests: PROVIDER_BREAKER_WINDOW_REQUESTS,
            breaker_error_rate_threshold: PROVIDER_BREAKER_ERROR_RATE_THRESHOLD,
            breaker_cooldown: Duration::from_secs(PROVIDER_BREAKER_COOLDOWN_SECS),
            shutdown_drain: Duration::from_secs(SHUTDOWN_DRAIN_SECS),
            reconciliation_lookback_secs: RECONCILIATION_LOOKBACK_SECS,
        }
    }
}
