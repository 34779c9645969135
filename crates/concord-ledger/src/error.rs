use thiserror::Error;

use concord_core::{Classify, ErrorKind, Micros};

/// Ledger operation error taxonomy (§4.4, §7), one flat enum for every
/// operation in this crate — the reference platform's `StateEngine::apply`
/// validates a whole batch of staged mutations and returns one error enum
/// covering every way a transaction can be rejected; this is that shape
/// applied to deposit/reserve/finalize/release/refund/payout.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("store error: {0}")]
    Store(#[from] concord_store::StoreError),

    #[error("insufficient funds: requested {requested}, available {available}, shortfall {shortfall}")]
    InsufficientFunds {
        requested: Micros,
        available: Micros,
        shortfall: Micros,
    },

    #[error("reservation {0} not found")]
    ReservationNotFound(uuid::Uuid),

    #[error("reservation {0} is not pending (state: {1:?})")]
    ReservationNotPending(uuid::Uuid, concord_core::ReservationState),

    #[error("reservation {0} has expired")]
    ReservationExpired(uuid::Uuid),

    #[error("account {0} not found")]
    AccountNotFound(uuid::Uuid),

    #[error("lot {0} not found")]
    LotNotFound(uuid::Uuid),

    #[error("optimistic-concurrency conflict on account {0} after {1} retries")]
    OccConflict(uuid::Uuid, u32),

    #[error("duplicate finalization id {0}, returning original result")]
    DuplicateFinalization(String),

    #[error("treasury reserve margin violated: reserve {reserve}, would-be-outstanding {outstanding}")]
    TreasuryMarginViolated { reserve: Micros, outstanding: Micros },

    #[error("payout {0} is not in a state that allows this transition")]
    PayoutStateConflict(uuid::Uuid),

    #[error("ledger invariant violated: {0}")]
    InvariantViolated(String),
}

impl Classify for LedgerError {
    fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Store(e) => e.kind(),
            LedgerError::InsufficientFunds { .. } => ErrorKind::Policy,
            LedgerError::ReservationNotFound(_) | LedgerError::AccountNotFound(_) | LedgerError::LotNotFound(_) => {
                ErrorKind::NotFound
            }
            LedgerError::ReservationNotPending(..) | LedgerError::ReservationExpired(_) => ErrorKind::Conflict,
            LedgerError::OccConflict(..) => ErrorKind::Conflict,
            LedgerError::DuplicateFinalization(_) => ErrorKind::Conflict,
            LedgerError::TreasuryMarginViolated { .. } => ErrorKind::Policy,
            LedgerError::PayoutStateConflict(_) => ErrorKind::Conflict,
            LedgerError::InvariantViolated(_) => ErrorKind::Integrity,
        }
    }
}
