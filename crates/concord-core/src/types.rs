use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Monetary amount in micro-units (1 unit = 1,000,000 micros). Never negative;
/// ledger entries carry a separate signed amount (see [`SignedMicros`]).
pub type Micros = u128;

/// Signed monetary delta, used for ledger entries where direction matters.
pub type SignedMicros = i128;

/// Wall-clock timestamp, always UTC.
pub type Timestamp = DateTime<Utc>;

/// Basis points (1 bp = 1/10000).
pub type Bps = u32;

/// `share = floor(amount * bps / 10000)`.
pub fn share_bps(amount: Micros, bps: Bps) -> Micros {
    amount.saturating_mul(bps as Micros) / 10_000
}

/// `bps = floor(part * 10000 / whole)`. Returns 0 when `whole` is 0.
pub fn bps_of(part: Micros, whole: Micros) -> Bps {
    if whole == 0 {
        return 0;
    }
    ((part.saturating_mul(10_000)) / whole) as Bps
}

macro_rules! uuid_id {
    ($name:ident, $prefix:literal) => {
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(u: Uuid) -> Self {
                Self(u)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "({})"), self.0)
            }
        }
    };
}

uuid_id!(AccountId, "AccountId");
uuid_id!(LotId, "LotId");
uuid_id!(ReservationId, "ReservationId");
uuid_id!(LedgerEntryId, "LedgerEntryId");
uuid_id!(PayoutId, "PayoutId");
uuid_id!(InvocationId, "InvocationId");

/// Opaque tenant identifier: one-to-one with an external chat-platform guild id.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommunityId(pub String);

impl fmt::Display for CommunityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for CommunityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CommunityId({})", self.0)
    }
}

impl From<String> for CommunityId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for CommunityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A credit budget bucket within an account — e.g. "commands", "agent.default".
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolId(pub String);

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PoolId({})", self.0)
    }
}

impl From<&str> for PoolId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Caller-supplied unique identifier guaranteeing at-most-once commit of a
/// reservation (or agent invocation) finalize.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FinalizationId(pub String);

impl fmt::Display for FinalizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for FinalizationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FinalizationId({})", self.0)
    }
}

/// 128-bit globally unique event identifier (§3.2).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u128);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().as_u128())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Debug for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventId({:032x})", self.0)
    }
}

/// The bus routing key that pins FIFO ordering. Equals the tenant id for
/// tenant-scoped events, otherwise the literal `"global"`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
pub struct SubjectKey(pub String);

impl SubjectKey {
    pub const GLOBAL: &'static str = "global";

    pub fn for_tenant(id: &CommunityId) -> Self {
        Self(id.0.clone())
    }

    pub fn global() -> Self {
        Self(Self::GLOBAL.to_string())
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Closed enumerations ──────────────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Pro,
    Enterprise,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    GuildCreate,
    GuildDelete,
    GuildUpdate,
    MemberAdd,
    MemberRemove,
    MemberUpdate,
    InteractionCreate,
    Ready,
    Resumed,
    HeartbeatAck,
    Other,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    TenantMain,
    TenantReserve,
    SystemTreasury,
    IdentityAnchored,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum LotSource {
    Deposit,
    Grant,
    Migration,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum ReservationState {
    Pending,
    Finalized,
    Released,
    Expired,
}

impl ReservationState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReservationState::Pending)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum LedgerEntryType {
    Deposit,
    Reserve,
    Finalize,
    Release,
    Refund,
    Grant,
    Escrow,
    EscrowRelease,
    ShadowCharge,
    CommonsContribution,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum PayoutState {
    Pending,
    Approved,
    Processing,
    Completed,
    Failed,
    Quarantined,
    Cancelled,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum AccountingMode {
    PlatformBudget,
    ByokNoBudget,
}

/// Strategy for multi-model agent requests (§4.5 ensemble accounting).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum EnsembleStrategy {
    BestOfN,
    Consensus,
    Fallback,
}

/// Classification used for error propagation and metrics (§7).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Debug)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Conflict,
    NotFound,
    Policy,
    Integrity,
    Fatal,
}

/// The event envelope published onto the bus (§3.2).
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct EventEnvelope {
    pub event_id: EventId,
    pub event_type: EventType,
    pub shard_id: u32,
    pub producer_ts: Timestamp,
    pub subject_key: SubjectKey,
    pub payload: Vec<u8>,
    pub schema_version: u16,
}

impl EventEnvelope {
    pub const CURRENT_SCHEMA_VERSION: u16 = 1;
}
