//! concord-rpc
//!
//! JSON-RPC 2.0 administrative surface for a concord-node instance.
//!
//! Namespace: "concord"
//! Methods:
//!   concord_createTenant          — provision a community's tenant config
//!   concord_upgradeTenant         — change a tenant's tier
//!   concord_getTenantConfig       — read the active tenant config
//!   concord_getLedgerBalance      — available/reserved/consumed totals for an account/pool
//!   concord_getBreakerState       — current circuit-breaker state for a provider
//!   concord_rotateSigningKey      — rotate the agent gateway's ES256 signing key
//!   concord_triggerReconciliation — run one usage-reconciliation sweep immediately
//!   concord_proposeRuleOverride   — propose a revenue-rule override (four-eyes step 1)
//!   concord_approveRuleOverride   — approve a pending override (four-eyes step 2)

pub mod api;
pub mod server;
pub mod types;

pub use server::{RpcServer, RpcServerState};
pub use types::{
    RpcAccountBalance, RpcBreakerState, RpcDriftRecord, RpcReconciliationReport,
    RpcRuleOverrideResult, RpcTenantConfig,
};
