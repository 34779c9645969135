use thiserror::Error;

use concord_core::{Classify, ErrorKind};

/// Dispatch-pipeline error taxonomy (§7), one flat enum grouped by the
/// pipeline step that raises it — the reference platform's `ChronxError`
/// shape, generalized from transaction-application failures to event
/// dispatch failures.
#[derive(Debug, Error)]
pub enum DispatchError {
    // ── decode ──────────────────────────────────────────────────────────
    #[error("malformed event envelope: {0}")]
    Malformed(String),

    // ── tenant context ──────────────────────────────────────────────────
    #[error("tenant cache error: {0}")]
    Tenant(#[from] concord_tenant::TenantError),

    // ── persistence (seen-set / outcome store) ───────────────────────────
    #[error("store error: {0}")]
    Store(#[from] concord_store::StoreError),

    // ── idempotency / rate limit ─────────────────────────────────────────
    #[error("shared cache error: {0}")]
    Cache(#[from] concord_kv::KvError),

    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: i64 },

    // ── handler ───────────────────────────────────────────────────────────
    #[error("handler transient failure: {0}")]
    HandlerTransient(String),

    #[error("handler permanent failure: {0}")]
    HandlerPermanent(String),

    // ── bus ───────────────────────────────────────────────────────────────
    #[error("bus error: {0}")]
    Bus(#[from] concord_bus::BusError),
}

impl Classify for DispatchError {
    fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Malformed(_) => ErrorKind::Policy,
            DispatchError::Tenant(e) => e.kind(),
            DispatchError::Store(e) => e.kind(),
            DispatchError::Cache(e) => e.kind(),
            DispatchError::RateLimited { .. } => ErrorKind::Policy,
            DispatchError::HandlerTransient(_) => ErrorKind::Transient,
            DispatchError::HandlerPermanent(_) => ErrorKind::Fatal,
            DispatchError::Bus(e) => e.kind(),
        }
    }
}
