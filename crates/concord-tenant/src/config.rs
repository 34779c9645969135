use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use concord_core::Tier;
use concord_store::models::CommunityRow;

/// The `{tenant_config, global_config, feature_flag}` bundle read by every
/// pipeline stage that needs tenant-scoped policy (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub community_id: String,
    pub tier: Tier,
    pub feature_flags: serde_json::Value,
    pub rate_limit_minute: Option<i64>,
    pub rate_limit_hour: Option<i64>,
    pub rate_limit_day: Option<i64>,
    pub loaded_at: DateTime<Utc>,
}

impl TenantConfig {
    pub fn from_row(row: &CommunityRow) -> Self {
        Self {
            community_id: row.community_id.clone(),
            tier: row.tier(),
            feature_flags: row.feature_flags.clone(),
            rate_limit_minute: row.rate_limit_minute,
            rate_limit_hour: row.rate_limit_hour,
            rate_limit_day: row.rate_limit_day,
            loaded_at: Utc::now(),
        }
    }

    /// Built-in defaults for a tenant with no stored configuration yet.
    /// Limits of `None` mean "fall back to the tier default" at the
    /// rate-limiter, except Enterprise which is the unlimited sentinel.
    pub fn default_for_tier(community_id: &str, tier: Tier) -> Self {
        let (minute, hour, day) = match tier {
            Tier::Free => (Some(20), Some(300), Some(2_000)),
            Tier::Pro => (Some(120), Some(3_000), Some(30_000)),
            Tier::Enterprise => (None, None, None),
        };
        Self {
            community_id: community_id.to_string(),
            tier,
            feature_flags: serde_json::json!({}),
            rate_limit_minute: minute,
            rate_limit_hour: hour,
            rate_limit_day: day,
            loaded_at: Utc::now(),
        }
    }

    pub fn is_unlimited(&self) -> bool {
        matches!(self.tier, Tier::Enterprise)
    }
}
