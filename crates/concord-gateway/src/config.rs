use concord_core::{
    PUBLISH_BUFFER_CAP, PUBLISH_MAX_RETRIES, SHARD_BACKOFF_BASE_SECS, SHARD_BACKOFF_CAP_SECS,
    SHARD_BACKOFF_JITTER_PCT, SHARD_BREAKER_COOLDOWN_SECS, SHARD_BREAKER_ERROR_THRESHOLD,
    SHARD_BREAKER_WINDOW_SECS,
};

/// Gateway shard-pool configuration, loaded from environment by
/// `concord-node`. Mirrors the reference platform's `P2pConfig`: a plain
/// struct with a `Default` impl instead of a builder.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Total shard count advertised to the upstream gateway.
    pub shard_count: u32,
    /// Shards owned by this process (a contiguous range within
    /// `0..shard_count`).
    pub shards_per_process: u32,
    pub shard_range_start: u32,

    pub backoff_base_secs: u64,
    pub backoff_cap_secs: u64,
    pub backoff_jitter_pct: f64,

    pub publish_max_retries: u32,
    pub publish_buffer_cap: usize,

    pub breaker_error_threshold: u32,
    pub breaker_window_secs: u64,
    pub breaker_cooldown_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            shard_count: 1,
            shards_per_process: 1,
            shard_range_start: 0,
            backoff_base_secs: SHARD_BACKOFF_BASE_SECS,
            backoff_cap_secs: SHARD_BACKOFF_CAP_SECS,
            backoff_jitter_pct: SHARD_BACKOFF_JITTER_PCT,
            publish_max_retries: PUBLISH_MAX_RETRIES,
            publish_buffer_cap: PUBLISH_BUFFER_CAP,
            breaker_error_threshold: SHARD_BREAKER_ERROR_THRESHOLD,
            breaker_window_secs: SHARD_BREAKER_WINDOW_SECS,
            breaker_cooldown_secs: SHARD_BREAKER_COOLDOWN_SECS,
        }
    }
}
