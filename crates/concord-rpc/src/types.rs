use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// JSON-serializable tenant config returned by `concord_getTenantConfig`,
/// `concord_createTenant`, and `concord_upgradeTenant`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcTenantConfig {
    pub community_id: String,
    pub tier: String,
    pub feature_flags: serde_json::Value,
    pub rate_limit_minute: Option<i64>,
    pub rate_limit_hour: Option<i64>,
    pub rate_limit_day: Option<i64>,
    pub loaded_at: DateTime<Utc>,
}

impl From<concord_tenant::config::TenantConfig> for RpcTenantConfig {
    fn from(c: concord_tenant::config::TenantConfig) -> Self {
        Self {
            community_id: c.community_id,
            tier: match c.tier {
                concord_core::Tier::Free => "free".to_string(),
                concord_core::Tier::Pro => "pro".to_string(),
                concord_core::Tier::Enterprise => "enterprise".to_string(),
            },
            feature_flags: c.feature_flags,
            rate_limit_minute: c.rate_limit_minute,
            rate_limit_hour: c.rate_limit_hour,
            rate_limit_day: c.rate_limit_day,
            loaded_at: c.loaded_at,
        }
    }
}

/// Per-lot-pool balance summary returned by `concord_getLedgerBalance`.
/// Amounts are decimal strings (u128 has no native JSON mapping).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcAccountBalance {
    pub account_id: String,
    pub pool_id: String,
    pub available_micro: String,
    pub reserved_micro: String,
    pub consumed_micro: String,
    pub original_micro: String,
}

/// Circuit-breaker snapshot returned by `concord_getBreakerState`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcBreakerState {
    pub provider: String,
    pub state: String,
}

/// One bucket's drift, mirroring `concord_agent::reconcile::DriftRecord`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcDriftRecord {
    pub community_id: String,
    pub pool_id: String,
    pub local_cost_micro: String,
    pub reported_cost_micro: String,
    pub drift_micro: i128,
    pub drift_bps: u32,
    pub compensated: bool,
}

/// Result of `concord_triggerReconciliation`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcReconciliationReport {
    pub buckets_examined: usize,
    pub drifts: Vec<RpcDriftRecord>,
}

/// Result of a successful `concord_approveRuleOverride`. A same-actor
/// attempt never reaches this type — it's rejected as a typed
/// `four_eyes_violation` RPC error instead (§6: "rejects same-actor
/// approval with typed `four_eyes_violation`").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRuleOverrideResult {
    pub rule_id: String,
    pub proposer: String,
    pub approver: String,
    pub approved_at: DateTime<Utc>,
}
