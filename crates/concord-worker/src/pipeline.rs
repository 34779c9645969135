use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use concord_bus::Delivery;
use concord_core::{
    EventEnvelope, IDEMPOTENCY_LOCK_TTL_DEFAULT_SECS, IDEMPOTENCY_LOCK_TTL_EXTERNAL_CALL_SECS,
    REPLAY_WINDOW_SECS,
};
use concord_kv::SharedCache;
use concord_store::Store;
use concord_tenant::{RateLimiter, TenantCache, Window};

use crate::error::DispatchError;
use crate::registry::{HandlerContext, HandlerRegistry};

/// Result of one run through the LVVER pipeline, distinct from `Err` so the
/// caller can ack a duplicate or a rate-limited request without treating
/// either as a handler failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Duplicate,
    RateLimited { retry_after_ms: i64 },
}

/// Everything one pipeline run needs: the bus/cache/store handles and the
/// handler registry. One `DispatchContext` is shared across every
/// concurrently in-flight message in a worker process.
pub struct DispatchContext {
    pub cache: Arc<dyn SharedCache>,
    pub store: Arc<Store>,
    pub tenant_cache: Arc<TenantCache>,
    pub limiter: Arc<RateLimiter>,
    pub registry: Arc<HandlerRegistry>,
}

impl DispatchContext {
    /// Run the 9-step LVVER pipeline (§4.3) over one delivery. Returns the
    /// terminal [`Outcome`] on a handled path, or the [`DispatchError`] that
    /// decided the pipeline should stop — the caller maps its
    /// [`concord_core::Classify::kind`] onto ack/nack/dead-letter.
    pub async fn dispatch_one(
        &self,
        delivery: &Delivery,
        cancel: CancellationToken,
    ) -> Result<Outcome, DispatchError> {
        let envelope = &delivery.envelope;

        // 1. Decode: already done by the bus layer; reject unsupported
        // schema versions here rather than guessing at the payload shape.
        if envelope.schema_version > EventEnvelope::CURRENT_SCHEMA_VERSION {
            return Err(DispatchError::Malformed(format!(
                "unsupported schema_version {}",
                envelope.schema_version
            )));
        }

        // 2. Tenant-context attach.
        let tenant_id = envelope.subject_key.0.clone();
        let cfg = self.tenant_cache.get_or_load(&tenant_id).await?;

        // 3. Idempotency lock.
        let lock_key = format!("lock:event:{}", envelope.event_id);
        let lock_token = Uuid::new_v4().to_string();
        let ttl_secs = if requires_external_call(envelope) {
            IDEMPOTENCY_LOCK_TTL_EXTERNAL_CALL_SECS
        } else {
            IDEMPOTENCY_LOCK_TTL_DEFAULT_SECS
        };
        let acquired = self
            .cache
            .try_acquire_lock(&lock_key, &lock_token, ttl_secs * 1000)
            .await?;
        if !acquired {
            info!(event_id = %envelope.event_id, "duplicate event, lock already held");
            return Ok(Outcome::Duplicate);
        }

        let result = self.run_locked(envelope, &cfg, cancel).await;

        if let Err(e) = self.cache.release_lock(&lock_key, &lock_token).await {
            warn!(event_id = %envelope.event_id, error = %e, "failed to release idempotency lock");
        }

        result
    }

    /// Steps 4-8, run while the idempotency lock is held.
    async fn run_locked(
        &self,
        envelope: &EventEnvelope,
        cfg: &concord_tenant::TenantConfig,
        cancel: CancellationToken,
    ) -> Result<Outcome, DispatchError> {
        // 4. Replay-window check.
        let age_secs = (Utc::now() - envelope.producer_ts).num_seconds();
        if age_secs > REPLAY_WINDOW_SECS {
            let outcome = serde_json::json!({"rejected": "replay_window"});
            self.store
                .record_outcome(&envelope.event_id.to_string(), "rejected_replay", outcome)
                .await?;
            return Err(DispatchError::Malformed("event outside replay window".into()));
        }

        // 5. Duplicate check against the persistent seen-set.
        let is_new = self
            .store
            .mark_seen_if_new(&envelope.event_id.to_string())
            .await?;
        if !is_new {
            return Ok(Outcome::Duplicate);
        }

        // 6. Rate-limit consume.
        let action = format!("{:?}", envelope.event_type).to_lowercase();
        let decision = self
            .limiter
            .consume(
                cfg,
                &action,
                Window::Minute,
                &envelope.event_id.to_string(),
            )
            .await?;
        if !decision.allowed {
            let detail = serde_json::json!({"retry_after_ms": decision.retry_after_ms});
            self.store
                .record_outcome(&envelope.event_id.to_string(), "rate_limited", detail)
                .await?;
            return Ok(Outcome::RateLimited {
                retry_after_ms: decision.retry_after_ms,
            });
        }

        // 7. Handler invoke.
        let handler_result = match self.registry.get(envelope.event_type) {
            Some(handler) => {
                handler
                    .handle(HandlerContext {
                        envelope,
                        cancel: cancel.clone(),
                    })
                    .await
            }
            None => {
                // No registered handler for this event type is a no-op
                // success, not an error: the gateway forwards every event
                // type it sees, including ones this deployment has no
                // business logic for yet.
                Ok(())
            }
        };

        // 8. Record.
        match &handler_result {
            Ok(()) => {
                self.store
                    .record_outcome(
                        &envelope.event_id.to_string(),
                        "success",
                        serde_json::json!({}),
                    )
                    .await?;
            }
            Err(e) => {
                let detail = serde_json::json!({"error": e.to_string()});
                self.store
                    .record_outcome(&envelope.event_id.to_string(), "failure", detail)
                    .await?;
            }
        }

        handler_result.map(|()| Outcome::Success)
    }
}

fn requires_external_call(envelope: &EventEnvelope) -> bool {
    matches!(envelope.event_type, concord_core::EventType::InteractionCreate)
}
