use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use concord_core::{AccountingMode, Micros};
use concord_ledger::LedgerEngine;
use concord_store::models::AgentInvocationRow;
use concord_store::Store;

use crate::breaker::ProviderBreakers;
use crate::config::AgentConfig;
use crate::error::AgentError;
use crate::keyring::{AgentClaims, SigningKeyRing};
use crate::registry::ModelRegistry;
use crate::transport::{AgentEventKind, AgentTransport, RelayedEvent};

/// A request already authorized upstream (§4.5 step 1: "authorize the
/// caller; resolve (tenant, user, pool_id)" — the authentication mechanism
/// itself is chat-platform-specific and out of scope, §1).
#[derive(Debug, Clone)]
pub struct AgentRequest {
    pub tenant: String,
    pub user_id: String,
    pub pool_id: String,
    pub model_alias: String,
    pub accounting_mode: AccountingMode,
    pub max_cost_micro: Micros,
    pub pool_mapping_version: u32,
}

/// Final per-invocation accounting, returned after the upstream stream ends
/// (§4.5 step 7).
#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub invocation_id: Uuid,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub actual_cost_micro: Micros,
}

/// Orchestrates the §4.5 request pipeline: resolve model → classify budget
/// → reserve → mint JWT → relay upstream stream → finalize. One gateway
/// instance is shared across every concurrent request in the process, the
/// same role `concord_worker::DispatchContext` plays for event dispatch.
pub struct AgentGateway<T: AgentTransport> {
    pub store: Arc<Store>,
    pub ledger: LedgerEngine,
    pub registry: ModelRegistry,
    pub keyring: Arc<RwLock<SigningKeyRing>>,
    pub breakers: Arc<ProviderBreakers>,
    pub config: AgentConfig,
    _transport: std::marker::PhantomData<T>,
}

impl<T: AgentTransport> AgentGateway<T> {
    pub fn new(
        store: Arc<Store>,
        ledger: LedgerEngine,
        registry: ModelRegistry,
        keyring: Arc<RwLock<SigningKeyRing>>,
        breakers: Arc<ProviderBreakers>,
        config: AgentConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            registry,
            keyring,
            breakers,
            config,
            _transport: std::marker::PhantomData,
        }
    }

    /// Drive one request end to end, forwarding relayed events on `out` as
    /// they arrive. Returns the invocation's final accounting once the
    /// upstream stream ends, or an error if any pipeline step failed —
    /// steps after a reservation is taken always release or finalize it
    /// before returning, even on the error path.
    pub async fn handle_request(
        &self,
        req: &AgentRequest,
        account_id: Uuid,
        mut transport: T,
        out: mpsc::Sender<RelayedEvent>,
        cancel: CancellationToken,
    ) -> Result<InvocationResult, AgentError> {
        // 2. Model alias → provider resolution.
        let spec = self.registry.resolve(&req.model_alias)?;
        let provider = spec.provider.clone();
        let provider_model_id = spec.provider_model_id.clone();

        // 3/4. Budget classification + reservation.
        let reservation_id = match req.accounting_mode {
            AccountingMode::PlatformBudget => {
                let reservation = self
                    .ledger
                    .reserve(
                        account_id,
                        &req.tenant,
                        &req.pool_id,
                        req.max_cost_micro,
                        // The reservation must outlive the whole upstream
                        // call; a small buffer avoids losing a race with
                        // the total timeout on a slow finalize.
                        ChronoDuration::seconds(self.config.total_timeout.as_secs() as i64 + 30),
                    )
                    .await
                    .map_err(|e| match e {
                        concord_ledger::LedgerError::InsufficientFunds {
                            requested,
                            available,
                            shortfall,
                        } => AgentError::BudgetExceeded {
                            requested,
                            available,
                            shortfall,
                        },
                        other => AgentError::Ledger(other),
                    })?;
                Some(reservation.reservation_id)
            }
            AccountingMode::ByokNoBudget => None,
        };

        let result = self
            .run_stream(req, &provider, &provider_model_id, &mut transport, out, cancel)
            .await;

        // 7. Finalize: always resolves the reservation before returning,
        // success or failure.
        let invocation_id = Uuid::new_v4();
        let outcome = match result {
            Ok((input_tokens, output_tokens)) => {
                let cost = spec.cost(input_tokens, output_tokens);
                let finalization_id = invocation_id.to_string();
                if let Some(rid) = reservation_id {
                    self.ledger
                        .finalize(account_id, rid, cost, &finalization_id)
                        .await?;
                }
                self.breakers.record(&provider, false).await;
                Ok(InvocationResult {
                    invocation_id,
                    input_tokens,
                    output_tokens,
                    actual_cost_micro: cost,
                })
            }
            Err(e) => {
                if let Some(rid) = reservation_id {
                    if let Err(release_err) = self.ledger.release(account_id, rid).await {
                        warn!(error = %release_err, %rid, "failed to release reservation after failed invocation");
                    }
                }
                self.breakers.record(&provider, true).await;
                Err(e)
            }
        };

        let status = if outcome.is_ok() { "success" } else { "failure" };
        let (input_tokens, output_tokens, cost_micro) = match &outcome {
            Ok(r) => (r.input_tokens as i64, r.output_tokens as i64, r.actual_cost_micro.to_string()),
            Err(_) => (0, 0, "0".to_string()),
        };
        let row = AgentInvocationRow {
            invocation_id,
            community_id: req.tenant.clone(),
            user_id: req.user_id.clone(),
            agent_id: provider.clone(),
            model_alias: req.model_alias.clone(),
            accounting_mode: match req.accounting_mode {
                AccountingMode::PlatformBudget => "platform_budget".to_string(),
                AccountingMode::ByokNoBudget => "byok_no_budget".to_string(),
            },
            pool_id: req.pool_id.clone(),
            input_tokens,
            output_tokens,
            cost_micro,
            latency_ms: None,
            status: status.to_string(),
            reservation_id,
            finalization_id: Some(invocation_id.to_string()),
            created_at: Utc::now(),
        };
        if let Err(e) = self.store.insert_agent_invocation(&row).await {
            warn!(error = %e, %invocation_id, "failed to record agent invocation");
        }

        outcome
    }

    async fn run_stream(
        &self,
        req: &AgentRequest,
        provider: &str,
        provider_model_id: &str,
        transport: &mut T,
        out: mpsc::Sender<RelayedEvent>,
        cancel: CancellationToken,
    ) -> Result<(u64, u64), AgentError> {
        if !self.breakers.allow(provider).await {
            return Err(AgentError::BreakerOpen(provider.to_string()));
        }

        // 5. Token minting.
        let exp = Utc::now() + ChronoDuration::seconds(self.config.jwt_ttl_secs);
        let claims = AgentClaims {
            sub: req.user_id.clone(),
            tenant: req.tenant.clone(),
            pool_id: req.pool_id.clone(),
            model_alias: req.model_alias.clone(),
            accounting_mode: req.accounting_mode,
            pool_mapping_version: req.pool_mapping_version,
            exp: exp.timestamp(),
            jti: String::new(),
        };
        let jwt = {
            let ring = self.keyring.read().await;
            ring.mint(claims).map_err(|_| AgentError::Signing("mint failed".into()))?
        };

        // 6. Upstream call + relay, with connect/first-byte/total timeouts.
        let config = &self.config;
        tokio::select! {
            connect = transport.connect(&jwt, provider, provider_model_id) => {
                connect.map_err(AgentError::Upstream)?;
            }
            _ = tokio::time::sleep(config.connect_timeout) => {
                return Err(AgentError::ConnectTimeout);
            }
            _ = cancel.cancelled() => {
                transport.close().await;
                return Err(AgentError::Cancelled);
            }
        }

        let next_id = AtomicU64::new(1);
        let mut input_tokens = 0u64;
        let mut output_tokens = 0u64;
        let mut first_byte_seen = false;
        let deadline = tokio::time::Instant::now() + config.total_timeout;

        loop {
            let item = tokio::select! {
                item = transport.next_event() => item,
                _ = tokio::time::sleep_until(deadline) => {
                    transport.close().await;
                    return Err(AgentError::TotalTimeout);
                }
                _ = cancel.cancelled() => {
                    transport.close().await;
                    return Err(AgentError::Cancelled);
                }
                _ = tokio::time::sleep(config.first_byte_timeout), if !first_byte_seen => {
                    transport.close().await;
                    return Err(AgentError::FirstByteTimeout);
                }
            };

            match item.map_err(AgentError::Upstream)? {
                None => break,
                Some(mut event) => {
                    first_byte_seen = true;
                    event.event_id = next_id.fetch_add(1, Ordering::SeqCst);
                    if let AgentEventKind::UsageReport {
                        input_tokens: i,
                        output_tokens: o,
                    } = &event.kind
                    {
                        input_tokens = *i;
                        output_tokens = *o;
                    }
                    let is_final = matches!(event.kind, AgentEventKind::MessageFinal { .. });
                    if out.send(event).await.is_err() {
                        // Caller disconnected: cancellation propagates
                        // immediately upstream (§4.5 resilience).
                        transport.close().await;
                        return Err(AgentError::Cancelled);
                    }
                    if is_final {
                        break;
                    }
                }
            }
        }

        transport.close().await;
        info!(provider, "agent stream complete");
        Ok((input_tokens, output_tokens))
    }
}
