use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tracing::{info, warn};

use concord_core::{bps_of, Micros, SignedMicros};
use concord_ledger::LedgerEngine;
use concord_store::Store;

use crate::config::AgentConfig;
use crate::error::AgentError;

/// One provider-reported usage total for a (community, pool) bucket over the
/// sweep's lookback window ("Usage reconciliation": "pulls usage reports
/// from the provider for the last hour").
#[derive(Debug, Clone)]
pub struct UsageReportLine {
    pub community_id: String,
    pub pool_id: String,
    pub reported_cost_micro: Micros,
}

/// Abstraction over the provider's usage-report endpoint, the same role
/// [`crate::transport::AgentTransport`] plays for the streaming call itself
/// — the real provider billing API is out of scope, so this trait is what
/// lets the sweep run against a deterministic fake in tests.
#[async_trait]
pub trait UsageReportSource: Send + Sync {
    async fn usage_since(&self, since: DateTime<Utc>) -> Result<Vec<UsageReportLine>, String>;
}

/// Per-bucket drift between what the provider billed and what was recorded
/// locally, returned for every bucket the sweep examined (not just the ones
/// that exceeded tolerance) so callers can export a full metrics snapshot.
#[derive(Debug, Clone)]
pub struct DriftRecord {
    pub community_id: String,
    pub pool_id: String,
    pub local_cost_micro: Micros,
    pub reported_cost_micro: Micros,
    pub drift_micro: SignedMicros,
    pub drift_bps: u32,
    pub compensated: bool,
}

/// Result of one sweep pass.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationReport {
    pub buckets_examined: usize,
    pub drifts: Vec<DriftRecord>,
}

/// Periodically cross-checks provider-reported usage against locally
/// recorded `agent_invocations` totals and posts a compensating ledger
/// entry when drift exceeds [`concord_ledger::LedgerConfig::drift_tolerance_bps`]
/// (§4.5 "Usage reconciliation"). Run by `concord-node`'s background
/// scheduler on a fixed interval, the same role `LedgerEngine::expire_sweep`
/// plays for reservation expiry.
pub struct ReconciliationSweep<S: UsageReportSource> {
    store: Arc<Store>,
    ledger: LedgerEngine,
    source: S,
    config: AgentConfig,
}

impl<S: UsageReportSource> ReconciliationSweep<S> {
    pub fn new(store: Arc<Store>, ledger: LedgerEngine, source: S, config: AgentConfig) -> Self {
        Self { store, ledger, source, config }
    }

    /// Run one sweep over the configured lookback window, compensating
    /// every bucket whose drift exceeds tolerance. Buckets the sweep can't
    /// resolve an account for (no `tenant_main` account yet provisioned)
    /// are logged and skipped rather than failing the whole sweep.
    pub async fn run_once(&self) -> Result<ReconciliationReport, AgentError> {
        let since = Utc::now() - ChronoDuration::seconds(self.config.reconciliation_lookback_secs);

        let provider_lines =
            self.source.usage_since(since).await.map_err(AgentError::Upstream)?;
        let local_rows = self.store.agent_invocations_since(since).await?;

        let mut local_totals: HashMap<(String, String), Micros> = HashMap::new();
        for row in &local_rows {
            if row.status != "success" {
                continue;
            }
            let entry = local_totals
                .entry((row.community_id.clone(), row.pool_id.clone()))
                .or_insert(0);
            *entry += concord_store::models::parse_micro(&row.cost_micro);
        }

        let mut report = ReconciliationReport::default();
        let tolerance_bps = self.ledger.config().drift_tolerance_bps;

        for line in &provider_lines {
            let key = (line.community_id.clone(), line.pool_id.clone());
            let local_total = local_totals.remove(&key).unwrap_or(0);
            report.buckets_examined += 1;

            let drift: SignedMicros = line.reported_cost_micro as SignedMicros - local_total as SignedMicros;
            let basis = local_total.max(line.reported_cost_micro).max(1);
            let drift_bps = bps_of(drift.unsigned_abs(), basis);

            metrics::gauge!(
                "agent_reconciliation_drift_micro",
                "community_id" => line.community_id.clone(),
                "pool_id" => line.pool_id.clone()
            )
            .set(drift as f64);

            let mut compensated = false;
            if drift_bps > tolerance_bps {
                match self
                    .compensate_bucket(&line.community_id, &line.pool_id, drift, since)
                    .await
                {
                    Ok(Some(_)) => {
                        compensated = true;
                        metrics::counter!(
                            "agent_reconciliation_compensations_total",
                            "community_id" => line.community_id.clone()
                        )
                        .increment(1);
                        warn!(
                            community_id = %line.community_id,
                            pool_id = %line.pool_id,
                            drift,
                            drift_bps,
                            "usage drift exceeded tolerance, compensating"
                        );
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            community_id = %line.community_id,
                            pool_id = %line.pool_id,
                            error = %e,
                            "failed to post reconciliation compensation"
                        );
                    }
                }
            }

            report.drifts.push(DriftRecord {
                community_id: line.community_id.clone(),
                pool_id: line.pool_id.clone(),
                local_cost_micro: local_total,
                reported_cost_micro: line.reported_cost_micro,
                drift_micro: drift,
                drift_bps,
                compensated,
            });
        }

        info!(
            buckets = report.buckets_examined,
            compensations = report.drifts.iter().filter(|d| d.compensated).count(),
            "reconciliation sweep complete"
        );
        Ok(report)
    }

    async fn compensate_bucket(
        &self,
        community_id: &str,
        pool_id: &str,
        drift: SignedMicros,
        since: DateTime<Utc>,
    ) -> Result<Option<concord_store::models::LedgerEntryRow>, AgentError> {
        let Some(account) = self.store.get_account_for_community(community_id, "tenant_main").await? else {
            warn!(community_id, "no tenant_main account for reconciliation bucket, skipping");
            return Ok(None);
        };
        let finalization_id = format!("reconcile:{community_id}:{pool_id}:{}", since.timestamp());
        let entry = self
            .ledger
            .compensate(
                account.account_id,
                pool_id,
                drift,
                &finalization_id,
                serde_json::json!({"reason": "usage_reconciliation", "window_start": since}),
            )
            .await?;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedSource(Vec<UsageReportLine>);

    #[async_trait]
    impl UsageReportSource for FixedSource {
        async fn usage_since(&self, _since: DateTime<Utc>) -> Result<Vec<UsageReportLine>, String> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn drift_bps_computation_matches_manual_expectation() {
        let local_total: Micros = 1_000_000;
        let reported: Micros = 1_000_500;
        let drift: SignedMicros = reported as SignedMicros - local_total as SignedMicros;
        let basis = local_total.max(reported).max(1);
        let drift_bps = bps_of(drift.unsigned_abs(), basis);
        assert_eq!(drift_bps, 5);
    }

    #[tokio::test]
    async fn usage_report_source_returns_configured_lines() {
        let source = FixedSource(vec![UsageReportLine {
            community_id: "tenant-a".into(),
            pool_id: "default".into(),
            reported_cost_micro: 42,
        }]);
        let lines = source.usage_since(Utc::now()).await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].reported_cost_micro, 42);
    }
}
