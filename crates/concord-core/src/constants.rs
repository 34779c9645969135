//! ─── Concord Core Constants ─────────────────────────────────────────────────
//!
//! Tuning knobs and fixed protocol parameters shared across the gateway,
//! worker, ledger, and agent gateway. Values come straight from the
//! component design sections of the spec; a config knob overrides these
//! where the spec calls a value "configurable".

// ── Monetary base unit ────────────────────────────────────────────────────────

/// 1 unit = 1,000,000 micros. No floating point anywhere in the ledger.
pub const MICROS_PER_UNIT: u128 = 1_000_000;

// ── Gateway ingress (§4.1) ───────────────────────────────────────────────────

pub const SHARD_BACKOFF_BASE_SECS: u64 = 1;
pub const SHARD_BACKOFF_CAP_SECS: u64 = 60;
pub const SHARD_BACKOFF_JITTER_PCT: f64 = 0.20;

/// Bounded retry count before a session buffers events in-memory.
pub const PUBLISH_MAX_RETRIES: u32 = 5;

/// In-memory buffer depth before the oldest buffered event is dropped.
pub const PUBLISH_BUFFER_CAP: usize = 1_000;

/// Consecutive publish errors within [`SHARD_BREAKER_WINDOW_SECS`] that trip
/// a shard's circuit breaker.
pub const SHARD_BREAKER_ERROR_THRESHOLD: u32 = 5;
pub const SHARD_BREAKER_WINDOW_SECS: u64 = 60;
pub const SHARD_BREAKER_COOLDOWN_SECS: u64 = 30;

// ── Event bus contract (§4.2) ────────────────────────────────────────────────

/// Redeliveries before a message lands on the dead-letter subject.
pub const BUS_MAX_REDELIVERIES: u32 = 5;

// ── Worker dispatch (§4.3) ───────────────────────────────────────────────────

pub const IDEMPOTENCY_LOCK_TTL_DEFAULT_SECS: u64 = 30;
pub const IDEMPOTENCY_LOCK_TTL_EXTERNAL_CALL_SECS: u64 = 60;

/// Events whose producer timestamp is older than this are rejected as replays.
pub const REPLAY_WINDOW_SECS: i64 = 5 * 60;

// ── Credit ledger & reservation engine (§4.4) ────────────────────────────────

/// Default I-3 drift tolerance between fast-path and slow-path committed
/// totals, expressed in basis points of the budget limit (10 bps = 0.1%).
pub const DEFAULT_DRIFT_TOLERANCE_BPS: u32 = 10;

pub const OCC_RETRY_ATTEMPTS: u32 = 3;
pub const OCC_RETRY_BACKOFF_MS: u64 = 10;

// ── Agent gateway (§4.5) ─────────────────────────────────────────────────────

pub const JWT_TTL_SECS: i64 = 5 * 60;

/// Signing-key rotation overlap: both the current and previous key id verify.
pub const SIGNING_KEY_OVERLAP_HOURS: i64 = 48;

pub const AGENT_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const AGENT_FIRST_BYTE_TIMEOUT_SECS: u64 = 15;
pub const AGENT_TOTAL_TIMEOUT_SECS: u64 = 120;

/// Per-provider circuit breaker: error-rate EWMA window.
pub const PROVIDER_BREAKER_WINDOW_REQUESTS: u32 = 20;
pub const PROVIDER_BREAKER_ERROR_RATE_THRESHOLD: f64 = 0.50;
pub const PROVIDER_BREAKER_COOLDOWN_SECS: u64 = 30;

/// Graceful-shutdown drain budget for in-flight streams.
pub const SHUTDOWN_DRAIN_SECS: u64 = 120;

/// Usage reconciliation sweep looks back this far.
pub const RECONCILIATION_LOOKBACK_SECS: i64 = 3_600;

// ── Tenant context & rate limiter (§4.6) ─────────────────────────────────────

pub const TENANT_CACHE_LOCAL_TTL_SECS: u64 = 30;
pub const TENANT_CACHE_RELOAD_POLL_SECS: u64 = 30;
pub const TENANT_CACHE_HOT_RELOAD_WORST_CASE_SECS: u64 = 30;

pub const RATE_WINDOW_MINUTE_SECS: i64 = 60;
pub const RATE_WINDOW_HOUR_SECS: i64 = 3_600;
pub const RATE_WINDOW_DAY_SECS: i64 = 86_400;

/// Sentinel meaning "tier=enterprise, limit does not apply".
pub const RATE_LIMIT_UNLIMITED: i64 = -1;

