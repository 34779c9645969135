use concord_core::Micros;
use concord_store::models::{LedgerEntryRow, LotRow};

/// I-1: for an account/pool, `committed + reserved + available` must equal
/// the sum of every lot's `original_micro`. `committed` here is each lot's
/// `consumed_micro`.
pub fn lot_conservation_holds(lots: &[LotRow]) -> bool {
    lots.iter().all(|l| l.available() + l.reserved() + l.consumed() == l.original())
}

/// I-2: the signed sum of every ledger entry for an account/pool, read as
/// double-entry deltas (deposits/grants/releases/refund-reversals credit
/// `available`; reserves/finalizes/refunds debit it), must reconcile
/// against the lots' current totals. This only checks magnitude
/// consistency of the entry log against itself — entries are never
/// mutated after insert, so drift here means a bug, not a race.
pub fn ledger_sum_micros(entries: &[LedgerEntryRow]) -> Micros {
    entries
        .iter()
        .map(|e| e.amount_micro.parse::<Micros>().unwrap_or(0))
        .sum()
}
