use std::sync::Arc;

use chrono::Utc;

use concord_kv::SharedCache;

use crate::config::TenantConfig;
use crate::error::TenantError;

/// Which per-tenant window a rate-limit consume targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Minute,
    Hour,
    Day,
}

impl Window {
    fn window_ms(self) -> i64 {
        match self {
            Window::Minute => 60_000,
            Window::Hour => 3_600_000,
            Window::Day => 86_400_000,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            Window::Minute => "minute",
            Window::Hour => "hour",
            Window::Day => "day",
        }
    }

    fn limit(self, cfg: &TenantConfig) -> Option<i64> {
        match self {
            Window::Minute => cfg.rate_limit_minute,
            Window::Hour => cfg.rate_limit_hour,
            Window::Day => cfg.rate_limit_day,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: i64,
    pub retry_after_ms: i64,
}

/// Sliding-window rate limiter over a `(community_id, action)` pair (§4.6).
/// Backed entirely by [`SharedCache::consume_sliding_window`] so the
/// remove+count+insert+expire sequence is one atomic script execution.
pub struct RateLimiter {
    shared: Arc<dyn SharedCache>,
}

impl RateLimiter {
    pub fn new(shared: Arc<dyn SharedCache>) -> Self {
        Self { shared }
    }

    /// Consume one unit against `action`'s window for this tenant.
    /// `tier=enterprise` is the unlimited sentinel: skip consume entirely.
    pub async fn consume(
        &self,
        cfg: &TenantConfig,
        action: &str,
        window: Window,
        request_token: &str,
    ) -> Result<RateLimitDecision, TenantError> {
        if cfg.is_unlimited() {
            return Ok(RateLimitDecision {
                allowed: true,
                remaining: i64::MAX,
                retry_after_ms: 0,
            });
        }

        let Some(limit) = window.limit(cfg) else {
            return Ok(RateLimitDecision {
                allowed: true,
                remaining: i64::MAX,
                retry_after_ms: 0,
            });
        };

        let key = format!(
            "ratelimit:{}:{}:{}",
            cfg.community_id,
            action,
            window.suffix()
        );
        let now_ms = Utc::now().timestamp_millis();
        let window_ms = window.window_ms();
        let result = self
            .shared
            .consume_sliding_window(&key, window_ms, limit, now_ms, request_token)
            .await?;

        Ok(RateLimitDecision {
            allowed: result.allowed,
            remaining: result.remaining,
            retry_after_ms: if result.allowed { 0 } else { window_ms },
        })
    }
}
