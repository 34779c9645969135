use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    AccountRow, AgentInvocationRow, AuditLogRow, CommunityRow, LedgerEntryRow, LotRow, PayoutRow,
    ReservationRow, TreasuryRow,
};

/// Handle to the relational ledger store (§6). Named methods map 1:1 onto
/// the tables of `migrations/0001_init.sql`; multi-table operations (the
/// ledger's reserve/finalize/release transactions) are composed by
/// `concord-ledger` directly against [`Store::pool`] so they can share one
/// `sqlx::Transaction`.
#[derive(Clone)]
pub struct Store {
    pool: PgPool,
}

impl Store {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    // ── Communities ──────────────────────────────────────────────────────────

    pub async fn get_community(&self, id: &str) -> Result<Option<CommunityRow>, StoreError> {
        let row = sqlx::query_as::<_, CommunityRow>(
            "SELECT * FROM communities WHERE community_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn upsert_community(
        &self,
        id: &str,
        tier: &str,
        rate_limit_minute: Option<i64>,
        rate_limit_hour: Option<i64>,
        rate_limit_day: Option<i64>,
    ) -> Result<CommunityRow, StoreError> {
        let row = sqlx::query_as::<_, CommunityRow>(
            r#"
            INSERT INTO communities (community_id, tier, rate_limit_minute, rate_limit_hour, rate_limit_day)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (community_id) DO UPDATE
                SET tier = EXCLUDED.tier,
                    rate_limit_minute = EXCLUDED.rate_limit_minute,
                    rate_limit_hour = EXCLUDED.rate_limit_hour,
                    rate_limit_day = EXCLUDED.rate_limit_day,
                    updated_at = now()
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(tier)
        .bind(rate_limit_minute)
        .bind(rate_limit_hour)
        .bind(rate_limit_day)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    // ── Accounts ─────────────────────────────────────────────────────────────

    pub async fn get_account(&self, id: Uuid) -> Result<Option<AccountRow>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT * FROM credit_accounts WHERE account_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn create_account(
        &self,
        community_id: &str,
        kind: &str,
        external_anchor: Option<&str>,
    ) -> Result<AccountRow, StoreError> {
        let id = Uuid::new_v4();
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            INSERT INTO credit_accounts (account_id, community_id, kind, external_anchor)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(community_id)
        .bind(kind)
        .bind(external_anchor)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Find a community's account of a given `kind` (e.g. `tenant_main`) —
    /// used by the agent gateway's reconciliation sweep to resolve the
    /// account a compensating ledger entry belongs to when all it has is
    /// an `agent_invocations` row's `community_id`.
    pub async fn get_account_for_community(
        &self,
        community_id: &str,
        kind: &str,
    ) -> Result<Option<AccountRow>, StoreError> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT * FROM credit_accounts WHERE community_id = $1 AND kind = $2 LIMIT 1",
        )
        .bind(community_id)
        .bind(kind)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    // ── Lots ─────────────────────────────────────────────────────────────────

    /// Lots for FIFO consumption: ordered `(created_at, lot_id)` ascending.
    pub async fn lots_fifo(
        &self,
        account_id: Uuid,
        pool_id: &str,
    ) -> Result<Vec<LotRow>, StoreError> {
        let rows = sqlx::query_as::<_, LotRow>(
            r#"
            SELECT * FROM credit_lots
            WHERE account_id = $1 AND pool_id = $2 AND available_micro::numeric > 0
            ORDER BY created_at ASC, lot_id ASC
            "#,
        )
        .bind(account_id)
        .bind(pool_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Every lot for an account/pool regardless of remaining balance —
    /// used by the admin RPC surface's `getLedgerBalance`, which reports
    /// the full available/reserved/consumed/original picture rather than
    /// just the lots still spendable.
    pub async fn lots_for_account_pool(
        &self,
        account_id: Uuid,
        pool_id: &str,
    ) -> Result<Vec<LotRow>, StoreError> {
        let rows = sqlx::query_as::<_, LotRow>(
            r#"
            SELECT * FROM credit_lots
            WHERE account_id = $1 AND pool_id = $2
            ORDER BY created_at ASC, lot_id ASC
            "#,
        )
        .bind(account_id)
        .bind(pool_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Lots for LIFO refund clawback: ordered `(created_at, lot_id)` descending.
    pub async fn lots_lifo(
        &self,
        account_id: Uuid,
        pool_id: &str,
    ) -> Result<Vec<LotRow>, StoreError> {
        let rows = sqlx::query_as::<_, LotRow>(
            r#"
            SELECT * FROM credit_lots
            WHERE account_id = $1 AND pool_id = $2
            ORDER BY created_at DESC, lot_id DESC
            "#,
        )
        .bind(account_id)
        .bind(pool_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn get_lot(&self, lot_id: Uuid) -> Result<Option<LotRow>, StoreError> {
        let row = sqlx::query_as::<_, LotRow>("SELECT * FROM credit_lots WHERE lot_id = $1")
            .bind(lot_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    // ── Reservations ─────────────────────────────────────────────────────────

    pub async fn get_reservation(
        &self,
        id: Uuid,
    ) -> Result<Option<ReservationRow>, StoreError> {
        let row = sqlx::query_as::<_, ReservationRow>(
            "SELECT * FROM credit_reservations WHERE reservation_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn expired_pending_reservations(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReservationRow>, StoreError> {
        let rows = sqlx::query_as::<_, ReservationRow>(
            "SELECT * FROM credit_reservations WHERE state = 'pending' AND expires_at < $1",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ── Ledger entries ───────────────────────────────────────────────────────

    pub async fn ledger_entries_for_account(
        &self,
        account_id: Uuid,
        pool_id: &str,
    ) -> Result<Vec<LedgerEntryRow>, StoreError> {
        let rows = sqlx::query_as::<_, LedgerEntryRow>(
            r#"
            SELECT * FROM credit_ledger
            WHERE account_id = $1 AND pool_id = $2
            ORDER BY entry_seq ASC
            "#,
        )
        .bind(account_id)
        .bind(pool_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn find_entry_by_finalization(
        &self,
        entry_type: &str,
        finalization_id: &str,
    ) -> Result<Vec<LedgerEntryRow>, StoreError> {
        let rows = sqlx::query_as::<_, LedgerEntryRow>(
            "SELECT * FROM credit_ledger WHERE entry_type = $1 AND finalization_id = $2",
        )
        .bind(entry_type)
        .bind(finalization_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ── Payouts ──────────────────────────────────────────────────────────────

    pub async fn get_payout(&self, id: Uuid) -> Result<Option<PayoutRow>, StoreError> {
        let row = sqlx::query_as::<_, PayoutRow>(
            "SELECT * FROM payout_requests WHERE payout_id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn pending_approved_processing_total(
        &self,
        account_id: Uuid,
    ) -> Result<String, StoreError> {
        let sum: Option<String> = sqlx::query_scalar(
            r#"
            SELECT COALESCE(SUM(amount_micro::numeric), 0)::text FROM payout_requests
            WHERE account_id = $1 AND state IN ('pending', 'approved', 'processing')
            "#,
        )
        .bind(account_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(sum.unwrap_or_else(|| "0".to_string()))
    }

    // ── Treasury ─────────────────────────────────────────────────────────────

    pub async fn get_treasury(&self) -> Result<TreasuryRow, StoreError> {
        let row = sqlx::query_as::<_, TreasuryRow>(
            "SELECT reserve_micro, occ_version FROM treasury_state WHERE id = true",
        )
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(r) => Ok(r),
            None => {
                sqlx::query(
                    "INSERT INTO treasury_state (id, reserve_micro, occ_version) VALUES (true, '0', 0)",
                )
                .execute(&self.pool)
                .await?;
                Ok(TreasuryRow {
                    reserve_micro: "0".to_string(),
                    occ_version: 0,
                })
            }
        }
    }

    // ── Worker dispatch: seen-set & outcomes ─────────────────────────────────

    /// Inserts the event id into the seen-set. Returns `true` if this is the
    /// first time the event has been observed (i.e. not a duplicate).
    pub async fn mark_seen_if_new(&self, event_id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "INSERT INTO seen_events (event_id) VALUES ($1) ON CONFLICT DO NOTHING",
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn get_outcome(&self, event_id: &str) -> Result<Option<(String, serde_json::Value)>, StoreError> {
        let row: Option<(String, serde_json::Value)> = sqlx::query_as(
            "SELECT outcome, detail FROM event_outcomes WHERE event_id = $1",
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn record_outcome(
        &self,
        event_id: &str,
        outcome: &str,
        detail: serde_json::Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO event_outcomes (event_id, outcome, detail) VALUES ($1, $2, $3)
            ON CONFLICT (event_id) DO UPDATE SET outcome = EXCLUDED.outcome, detail = EXCLUDED.detail
            "#,
        )
        .bind(event_id)
        .bind(outcome)
        .bind(detail)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ── Agent invocations ────────────────────────────────────────────────────

    pub async fn insert_agent_invocation(
        &self,
        row: &AgentInvocationRow,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO agent_invocations
                (invocation_id, community_id, user_id, agent_id, model_alias, accounting_mode,
                 pool_id, input_tokens, output_tokens, cost_micro, latency_ms, status,
                 reservation_id, finalization_id)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
            "#,
        )
        .bind(row.invocation_id)
        .bind(&row.community_id)
        .bind(&row.user_id)
        .bind(&row.agent_id)
        .bind(&row.model_alias)
        .bind(&row.accounting_mode)
        .bind(&row.pool_id)
        .bind(row.input_tokens)
        .bind(row.output_tokens)
        .bind(&row.cost_micro)
        .bind(row.latency_ms)
        .bind(&row.status)
        .bind(row.reservation_id)
        .bind(&row.finalization_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn agent_invocations_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<AgentInvocationRow>, StoreError> {
        let rows = sqlx::query_as::<_, AgentInvocationRow>(
            "SELECT * FROM agent_invocations WHERE created_at >= $1",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // ── Audit log (append-only; §6 triggers abort UPDATE/DELETE) ─────────────

    pub async fn append_revenue_rule_audit(
        &self,
        rule_id: &str,
        action: &str,
        proposer: &str,
        approver: Option<&str>,
        payload: serde_json::Value,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO revenue_rule_audit_log (id, rule_id, action, proposer, approver, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(rule_id)
        .bind(action)
        .bind(proposer)
        .bind(approver)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent audit row for a rule id, if any — the four-eyes check
    /// reads this to find an outstanding proposal and its proposer.
    pub async fn latest_rule_audit(&self, rule_id: &str) -> Result<Option<AuditLogRow>, StoreError> {
        let row = sqlx::query_as::<_, AuditLogRow>(
            "SELECT * FROM revenue_rule_audit_log WHERE rule_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn record_webhook_event(
        &self,
        provider: &str,
        provider_payment_id: &str,
        payload: serde_json::Value,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_events (id, provider, provider_payment_id, payload)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (provider, provider_payment_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(provider)
        .bind(provider_payment_id)
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
