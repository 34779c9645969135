use std::time::Duration;

use concord_core::constants::{DEFAULT_DRIFT_TOLERANCE_BPS, OCC_RETRY_ATTEMPTS, OCC_RETRY_BACKOFF_MS};
use concord_core::Bps;

/// Tuning knobs for [`crate::engine::LedgerEngine`] (§4.4, §4.4.A). Defaults
/// mirror the constants in `concord-core`; callers override per-deployment
/// via the node's config layer.
#[derive(Debug, Clone, Copy)]
pub struct LedgerConfig {
    /// I-3 drift tolerance between fast-path (cached) and slow-path (DB)
    /// committed totals, in basis points of the pool's budget limit.
    pub drift_tolerance_bps: Bps,
    pub occ_retry_attempts: u32,
    pub occ_retry_backoff: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            drift_tolerance_bps: DEFAULT_DRIFT_TOLERANCE_BPS,
            occ_retry_attempts: OCC_RETRY_ATTEMPTS,
            occ_retry_backoff: Duration::from_millis(OCC_RETRY_BACKOFF_MS),
        }
    }
}
