use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use jsonrpsee::core::{async_trait, RpcResult};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::types::ErrorObject;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use uuid::Uuid;

use concord_agent::reconcile::{ReconciliationSweep, UsageReportSource};
use concord_agent::breaker::ProviderBreakers;
use concord_agent::keyring::{SigningKey, SigningKeyRing};
use concord_core::BreakerState;
use concord_ledger::LedgerEngine;
use concord_store::Store;
use concord_tenant::TenantCache;

use crate::api::ConcordApiServer;
use crate::types::{
    RpcAccountBalance, RpcBreakerState, RpcDriftRecord, RpcReconciliationReport,
    RpcRuleOverrideResult, RpcTenantConfig,
};

fn rpc_err(code: i32, msg: impl Into<String>) -> ErrorObject<'static> {
    ErrorObject::owned(code, msg.into(), None::<()>)
}

/// Four-eyes violations get a stable, documented error code rather than the
/// generic -32603 internal-error bucket (§6: "typed `four_eyes_violation`").
const FOUR_EYES_VIOLATION_CODE: i32 = -32001;

/// Shared state passed to the RPC server, one instance per node process.
pub struct RpcServerState<S: UsageReportSource> {
    pub store: Arc<Store>,
    pub tenant_cache: Arc<TenantCache>,
    pub ledger: LedgerEngine,
    pub keyring: Arc<RwLock<SigningKeyRing>>,
    pub breakers: Arc<ProviderBreakers>,
    pub sweep: ReconciliationSweep<S>,
}

/// The RPC server implementation.
pub struct RpcServer<S: UsageReportSource> {
    state: Arc<RpcServerState<S>>,
}

impl<S: UsageReportSource + Send + Sync + 'static> RpcServer<S> {
    pub fn new(state: Arc<RpcServerState<S>>) -> Self {
        Self { state }
    }

    /// Start the JSON-RPC server on `addr` with permissive CORS headers.
    /// Returns a handle to stop it.
    pub async fn start(self, addr: SocketAddr) -> anyhow::Result<ServerHandle> {
        let cors = CorsLayer::new()
            .allow_methods(Any)
            .allow_origin(Any)
            .allow_headers(Any);

        let server = Server::builder()
            .set_http_middleware(tower::ServiceBuilder::new().layer(cors))
            .build(addr)
            .await?;

        let module = self.into_rpc();
        let handle = server.start(module);
        info!(%addr, "admin RPC server started");
        Ok(handle)
    }
}

fn breaker_state_str(s: BreakerState) -> &'static str {
    match s {
        BreakerState::Closed => "closed",
        BreakerState::Open => "open",
        BreakerState::HalfOpen => "half_open",
    }
}

#[async_trait]
impl<S: UsageReportSource + Send + Sync + 'static> ConcordApiServer for RpcServer<S> {
    async fn create_tenant(&self, community_id: String, tier: String) -> RpcResult<RpcTenantConfig> {
        let row = self
            .state
            .store
            .upsert_community(&community_id, &tier, None, None, None)
            .await
            .map_err(|e| rpc_err(-32603, e.to_string()))?;
        self.state.tenant_cache.invalidate(&community_id).await;
        let cfg = concord_tenant::config::TenantConfig::from_row(&row);
        Ok(cfg.into())
    }

    async fn upgrade_tenant(&self, community_id: String, tier: String) -> RpcResult<RpcTenantConfig> {
        let existing = self
            .state
            .store
            .get_community(&community_id)
            .await
            .map_err(|e| rpc_err(-32603, e.to_string()))?;
        let Some(existing) = existing else {
            return Err(rpc_err(-32004, format!("unknown tenant: {community_id}")).into());
        };
        let row = self
            .state
            .store
            .upsert_community(
                &community_id,
                &tier,
                existing.rate_limit_minute,
                existing.rate_limit_hour,
                existing.rate_limit_day,
            )
            .await
            .map_err(|e| rpc_err(-32603, e.to_string()))?;
        self.state.tenant_cache.broadcast_invalidate(&community_id).await.ok();
        let cfg = concord_tenant::config::TenantConfig::from_row(&row);
        Ok(cfg.into())
    }

    async fn get_tenant_config(&self, community_id: String) -> RpcResult<RpcTenantConfig> {
        let cfg = self
            .state
            .tenant_cache
            .get_or_load(&community_id)
            .await
            .map_err(|e| rpc_err(-32603, e.to_string()))?;
        Ok(cfg.into())
    }

    async fn get_ledger_balance(&self, account_id: String, pool_id: String) -> RpcResult<Vec<RpcAccountBalance>> {
        let id = Uuid::parse_str(&account_id).map_err(|e| rpc_err(-32602, format!("invalid account id: {e}")))?;
        let lots = self
            .state
            .store
            .lots_for_account_pool(id, &pool_id)
            .await
            .map_err(|e| rpc_err(-32603, e.to_string()))?;
        Ok(lots
            .into_iter()
            .map(|lot| RpcAccountBalance {
                account_id: account_id.clone(),
                pool_id: pool_id.clone(),
                available_micro: lot.available_micro,
                reserved_micro: lot.reserved_micro,
                consumed_micro: lot.consumed_micro,
                original_micro: lot.original_micro,
            })
            .collect())
    }

    async fn get_breaker_state(&self, provider: String) -> RpcResult<RpcBreakerState> {
        let state = self.state.breakers.state(&provider).await.unwrap_or(BreakerState::Closed);
        Ok(RpcBreakerState {
            provider,
            state: breaker_state_str(state).to_string(),
        })
    }

    async fn rotate_signing_key(
        &self,
        new_key_id: String,
        private_pem: String,
        public_pem: String,
    ) -> RpcResult<String> {
        let now = Utc::now();
        let key = SigningKey::from_ec_pem(new_key_id.clone(), &private_pem, &public_pem, now)
            .map_err(|e| rpc_err(-32602, e.to_string()))?;
        let mut ring = self.state.keyring.write().await;
        ring.rotate(key, now);
        info!(new_key_id, "signing key rotated via admin RPC");
        Ok(new_key_id)
    }

    async fn trigger_reconciliation(&self) -> RpcResult<RpcReconciliationReport> {
        let report = self
            .state
            .sweep
            .run_once()
            .await
            .map_err(|e| rpc_err(-32603, e.to_string()))?;
        Ok(RpcReconciliationReport {
            buckets_examined: report.buckets_examined,
            drifts: report
                .drifts
                .into_iter()
                .map(|d| RpcDriftRecord {
                    community_id: d.community_id,
                    pool_id: d.pool_id,
                    local_cost_micro: d.local_cost_micro.to_string(),
                    reported_cost_micro: d.reported_cost_micro.to_string(),
                    drift_micro: d.drift_micro,
                    drift_bps: d.drift_bps,
                    compensated: d.compensated,
                })
                .collect(),
        })
    }

    async fn propose_rule_override(
        &self,
        rule_id: String,
        proposer: String,
        payload: serde_json::Value,
    ) -> RpcResult<()> {
        self.state
            .store
            .append_revenue_rule_audit(&rule_id, "propose", &proposer, None, payload)
            .await
            .map_err(|e| rpc_err(-32603, e.to_string()))?;
        Ok(())
    }

    async fn approve_rule_override(&self, rule_id: String, approver: String) -> RpcResult<RpcRuleOverrideResult> {
        let latest = self
            .state
            .store
            .latest_rule_audit(&rule_id)
            .await
            .map_err(|e| rpc_err(-32603, e.to_string()))?;
        let Some(latest) = latest else {
            return Err(rpc_err(-32004, format!("no proposal outstanding for rule {rule_id}")).into());
        };
        if latest.action != "propose" {
            return Err(rpc_err(-32004, format!("no proposal outstanding for rule {rule_id}")).into());
        }
        if latest.proposer == approver {
            return Err(rpc_err(
                FOUR_EYES_VIOLATION_CODE,
                "four_eyes_violation: approver must differ from proposer",
            )
            .into());
        }

        self.state
            .store
            .append_revenue_rule_audit(&rule_id, "approve", &latest.proposer, Some(&approver), latest.payload.clone())
            .await
            .map_err(|e| rpc_err(-32603, e.to_string()))?;

        Ok(RpcRuleOverrideResult {
            rule_id,
            proposer: latest.proposer,
            approver,
            approved_at: Utc::now(),
        })
    }
}

