use jsonrpsee::core::RpcResult;
use jsonrpsee::proc_macros::rpc;

use crate::types::{
    RpcAccountBalance, RpcBreakerState, RpcReconciliationReport, RpcRuleOverrideResult,
    RpcTenantConfig,
};

/// Concord administrative JSON-RPC 2.0 API definition.
///
/// All method names are prefixed with "concord_" via `namespace = "concord"`.
#[rpc(server, namespace = "concord")]
pub trait ConcordApi {
    /// Provision a tenant config for a community. Idempotent — calling it
    /// again for an existing community updates tier/limits in place.
    #[method(name = "createTenant")]
    async fn create_tenant(&self, community_id: String, tier: String) -> RpcResult<RpcTenantConfig>;

    /// Change an existing tenant's tier. Unlike `createTenant`, this
    /// 404s (via `rpc_err`) if the community has never been provisioned.
    #[method(name = "upgradeTenant")]
    async fn upgrade_tenant(&self, community_id: String, tier: String) -> RpcResult<RpcTenantConfig>;

    /// Read the active tenant config (cache-through to the store).
    #[method(name = "getTenantConfig")]
    async fn get_tenant_config(&self, community_id: String) -> RpcResult<RpcTenantConfig>;

    /// Read per-pool lot balances for an account.
    #[method(name = "getLedgerBalance")]
    async fn get_ledger_balance(&self, account_id: String, pool_id: String) -> RpcResult<Vec<RpcAccountBalance>>;

    /// Read the current breaker state for an upstream provider.
    #[method(name = "getBreakerState")]
    async fn get_breaker_state(&self, provider: String) -> RpcResult<RpcBreakerState>;

    /// Rotate the agent gateway's signing key. `private_pem`/`public_pem`
    /// are PKCS8/SEC1 PEM text; the outgoing key remains valid for the
    /// configured overlap window. Returns the new key id.
    #[method(name = "rotateSigningKey")]
    async fn rotate_signing_key(
        &self,
        new_key_id: String,
        private_pem: String,
        public_pem: String,
    ) -> RpcResult<String>;

    /// Run one usage-reconciliation sweep immediately instead of waiting
    /// for the node's scheduled interval.
    #[method(name = "triggerReconciliation")]
    async fn trigger_reconciliation(&self) -> RpcResult<RpcReconciliationReport>;

    /// Propose a revenue-rule override. The first step of the four-eyes
    /// workflow — `approveRuleOverride` must be called by a different
    /// actor before the override takes effect.
    #[method(name = "proposeRuleOverride")]
    async fn propose_rule_override(
        &self,
        rule_id: String,
        proposer: String,
        payload: serde_json::Value,
    ) -> RpcResult<()>;

    /// Approve a pending revenue-rule override proposed by a different
    /// actor. Returns a typed `four_eyes_violation` error if `approver`
    /// matches the proposer on record.
    #[method(name = "approveRuleOverride")]
    async fn approve_rule_override(&self, rule_id: String, approver: String) -> RpcResult<RpcRuleOverrideResult>;
}
