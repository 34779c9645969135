use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use concord_core::{
    AccountKind, LedgerEntryType, LotSource, Micros, PayoutState, ReservationState, Tier,
};

/// Parses a `Micros` amount out of the TEXT column representation. Postgres
/// enforces the lot-conservation CHECK against the numeric cast; Rust only
/// needs the round-trip to/from decimal text since `u128` has no native
/// driver mapping.
pub fn parse_micro(s: &str) -> Micros {
    s.parse().unwrap_or(0)
}

pub fn micro_to_sql(m: Micros) -> String {
    m.to_string()
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CommunityRow {
    pub community_id: String,
    pub tier: String,
    pub feature_flags: serde_json::Value,
    pub rate_limit_minute: Option<i64>,
    pub rate_limit_hour: Option<i64>,
    pub rate_limit_day: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CommunityRow {
    pub fn tier(&self) -> Tier {
        match self.tier.as_str() {
            "pro" => Tier::Pro,
            "enterprise" => Tier::Enterprise,
            _ => Tier::Free,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AccountRow {
    pub account_id: Uuid,
    pub community_id: String,
    pub kind: String,
    pub external_anchor: Option<String>,
    pub occ_version: i64,
    pub created_at: DateTime<Utc>,
}

impl AccountRow {
    pub fn kind(&self) -> AccountKind {
        match self.kind.as_str() {
            "tenant_reserve" => AccountKind::TenantReserve,
            "system_treasury" => AccountKind::SystemTreasury,
            "identity_anchored" => AccountKind::IdentityAnchored,
            _ => AccountKind::TenantMain,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LotRow {
    pub lot_id: Uuid,
    pub account_id: Uuid,
    pub pool_id: String,
    pub original_micro: String,
    pub available_micro: String,
    pub reserved_micro: String,
    pub consumed_micro: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl LotRow {
    pub fn original(&self) -> Micros {
        parse_micro(&self.original_micro)
    }
    pub fn available(&self) -> Micros {
        parse_micro(&self.available_micro)
    }
    pub fn reserved(&self) -> Micros {
        parse_micro(&self.reserved_micro)
    }
    pub fn consumed(&self) -> Micros {
        parse_micro(&self.consumed_micro)
    }
    pub fn source(&self) -> LotSource {
        match self.source.as_str() {
            "grant" => LotSource::Grant,
            "migration" => LotSource::Migration,
            _ => LotSource::Deposit,
        }
    }
}

/// One (lot_id, micro) allocation within a reservation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Allocation {
    pub lot_id: Uuid,
    pub micro: Micros,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ReservationRow {
    pub reservation_id: Uuid,
    pub community_id: String,
    pub pool_id: String,
    pub requested_micro: String,
    pub state: String,
    pub allocations: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub finalization_id: Option<String>,
}

impl ReservationRow {
    pub fn requested(&self) -> Micros {
        parse_micro(&self.requested_micro)
    }

    pub fn state(&self) -> ReservationState {
        match self.state.as_str() {
            "finalized" => ReservationState::Finalized,
            "released" => ReservationState::Released,
            "expired" => ReservationState::Expired,
            _ => ReservationState::Pending,
        }
    }

    pub fn allocations(&self) -> Vec<Allocation> {
        serde_json::from_value(self.allocations.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct LedgerEntryRow {
    pub entry_id: Uuid,
    pub account_id: Uuid,
    pub pool_id: String,
    pub entry_type: String,
    pub amount_micro: String,
    pub reference_id: Option<Uuid>,
    pub entry_seq: i64,
    pub finalization_id: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntryRow {
    pub fn entry_type(&self) -> LedgerEntryType {
        match self.entry_type.as_str() {
            "reserve" => LedgerEntryType::Reserve,
            "finalize" => LedgerEntryType::Finalize,
            "release" => LedgerEntryType::Release,
            "refund" => LedgerEntryType::Refund,
            "grant" => LedgerEntryType::Grant,
            "escrow" => LedgerEntryType::Escrow,
            "escrow_release" => LedgerEntryType::EscrowRelease,
            "shadow_charge" => LedgerEntryType::ShadowCharge,
            "commons_contribution" => LedgerEntryType::CommonsContribution,
            _ => LedgerEntryType::Deposit,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PayoutRow {
    pub payout_id: Uuid,
    pub account_id: Uuid,
    pub amount_micro: String,
    pub state: String,
    pub provider_id: String,
    pub provider_payment_id: Option<String>,
    pub raw_payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PayoutRow {
    pub fn state(&self) -> PayoutState {
        match self.state.as_str() {
            "approved" => PayoutState::Approved,
            "processing" => PayoutState::Processing,
            "completed" => PayoutState::Completed,
            "failed" => PayoutState::Failed,
            "quarantined" => PayoutState::Quarantined,
            "cancelled" => PayoutState::Cancelled,
            _ => PayoutState::Pending,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TreasuryRow {
    pub reserve_micro: String,
    pub occ_version: i64,
}

/// A row of `revenue_rule_audit_log` (append-only, trigger-enforced). The
/// four-eyes check in `concord-rpc` reads the latest row for a rule id to
/// decide whether a proposal is outstanding and who proposed it.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuditLogRow {
    pub id: Uuid,
    pub rule_id: String,
    pub action: String,
    pub proposer: String,
    pub approver: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AgentInvocationRow {
    pub invocation_id: Uuid,
    pub community_id: String,
    pub user_id: String,
    pub agent_id: String,
    pub model_alias: String,
    pub accounting_mode: String,
    pub pool_id: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_micro: String,
    pub latency_ms: Option<i64>,
    pub status: String,
    pub reservation_id: Option<Uuid>,
    pub finalization_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
