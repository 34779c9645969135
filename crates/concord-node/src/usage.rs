use async_trait::async_trait;
use chrono::{DateTime, Utc};

use concord_agent::reconcile::{UsageReportLine, UsageReportSource};

/// Stand-in [`UsageReportSource`] for deployments that haven't wired a real
/// provider usage-report endpoint yet. The LLM provider is an external
/// collaborator out of this repo's scope; this source always reports zero
/// usage lines, so the reconciliation sweep and `concord_triggerReconciliation`
/// stay exercised on schedule without ever flagging drift.
pub struct NoUsageReports;

#[async_trait]
impl UsageReportSource for NoUsageReports {
    async fn usage_since(&self, _since: DateTime<Utc>) -> Result<Vec<UsageReportLine>, String> {
        Ok(Vec::new())
    }
}
