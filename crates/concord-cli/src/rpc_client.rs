use anyhow::{bail, Context};

use concord_rpc::{
    RpcAccountBalance, RpcBreakerState, RpcReconciliationReport, RpcRuleOverrideResult,
    RpcTenantConfig,
};

/// Simple JSON-RPC 2.0 client used by the operator CLI to talk to a running
/// `concord-node`.
///
/// Uses raw HTTP POST with serde_json rather than the full jsonrpsee client
/// to keep this binary lean and dependency-minimal.
pub struct AdminRpcClient {
    url: String,
    client: reqwest::Client,
}

impl AdminRpcClient {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Call a JSON-RPC method and return the `result` field.
    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("connecting to node at {}", self.url))?;

        let json: serde_json::Value = resp.json().await.context("parsing RPC response")?;

        if let Some(err) = json.get("error") {
            bail!("RPC error: {}", err);
        }

        Ok(json["result"].clone())
    }

    pub async fn create_tenant(
        &self,
        community_id: &str,
        tier: &str,
    ) -> anyhow::Result<RpcTenantConfig> {
        let result = self
            .call(
                "concord_createTenant",
                serde_json::json!([community_id, tier]),
            )
            .await?;
        serde_json::from_value(result).context("parsing tenant config")
    }

    pub async fn upgrade_tenant(
        &self,
        community_id: &str,
        tier: &str,
    ) -> anyhow::Result<RpcTenantConfig> {
        let result = self
            .call(
                "concord_upgradeTenant",
                serde_json::json!([community_id, tier]),
            )
            .await?;
        serde_json::from_value(result).context("parsing tenant config")
    }

    pub async fn get_tenant_config(&self, community_id: &str) -> anyhow::Result<RpcTenantConfig> {
        let result = self
            .call("concord_getTenantConfig", serde_json::json!([community_id]))
            .await?;
        serde_json::from_value(result).context("parsing tenant config")
    }

    pub async fn get_ledger_balance(
        &self,
        account_id: &str,
        pool_id: &str,
    ) -> anyhow::Result<Vec<RpcAccountBalance>> {
        let result = self
            .call(
                "concord_getLedgerBalance",
                serde_json::json!([account_id, pool_id]),
            )
            .await?;
        serde_json::from_value(result).context("parsing ledger balances")
    }

    pub async fn get_breaker_state(&self, provider: &str) -> anyhow::Result<RpcBreakerState> {
        let result = self
            .call("concord_getBreakerState", serde_json::json!([provider]))
            .await?;
        serde_json::from_value(result).context("parsing breaker state")
    }

    pub async fn rotate_signing_key(
        &self,
        new_key_id: &str,
        private_pem: &str,
        public_pem: &str,
    ) -> anyhow::Result<String> {
        let result = self
            .call(
                "concord_rotateSigningKey",
                serde_json::json!([new_key_id, private_pem, public_pem]),
            )
            .await?;
        result
            .as_str()
            .map(|s| s.to_string())
            .context("expected key id string from rotateSigningKey")
    }

    pub async fn trigger_reconciliation(&self) -> anyhow::Result<RpcReconciliationReport> {
        let result = self
            .call("concord_triggerReconciliation", serde_json::json!([]))
            .await?;
        serde_json::from_value(result).context("parsing reconciliation report")
    }

    pub async fn propose_rule_override(
        &self,
        rule_id: &str,
        proposer: &str,
        payload: serde_json::Value,
    ) -> anyhow::Result<()> {
        self.call(
            "concord_proposeRuleOverride",
            serde_json::json!([rule_id, proposer, payload]),
        )
        .await?;
        Ok(())
    }

    pub async fn approve_rule_override(
        &self,
        rule_id: &str,
        approver: &str,
    ) -> anyhow::Result<RpcRuleOverrideResult> {
        let result = self
            .call(
                "concord_approveRuleOverride",
                serde_json::json!([rule_id, approver]),
            )
            .await?;
        serde_json::from_value(result).context("parsing rule override result")
    }
}
