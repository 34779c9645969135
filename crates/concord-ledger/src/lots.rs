use concord_core::{LotId, Micros, ReservationId};
use concord_store::models::LotRow;

/// Which lots a `refund` operation claws back from, when the caller
/// supplies both a lot id and a reservation id for the same payment (§9
/// open question: "lot priority lotId ?? reservationId"). Lot id is
/// higher-specificity and wins whenever both are present; every refund
/// call site routes through [`resolve`] so the rule lives in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundTarget {
    Lot(LotId),
    Reservation(ReservationId),
}

/// Resolve a refund's target lot/reservation scope (§9.A). `None` means
/// "no specific payment named — claw back across the account/pool's lots
/// in plain LIFO order".
pub fn resolve(lot_id: Option<LotId>, reservation_id: Option<ReservationId>) -> Option<RefundTarget> {
    match (lot_id, reservation_id) {
        (Some(l), _) => Some(RefundTarget::Lot(l)),
        (None, Some(r)) => Some(RefundTarget::Reservation(r)),
        (None, None) => None,
    }
}

/// Walk `lots` (assumed already ordered FIFO: `created_at` then `lot_id`
/// ascending) and greedily allocate `amount` micros across their
/// `available_micro`. Returns `None` if the lots don't cover the full
/// amount. Pure — no I/O — so it is covered directly by property tests.
pub fn allocate_fifo(lots: &[LotRow], amount: Micros) -> Option<Vec<(uuid::Uuid, Micros)>> {
    let mut remaining = amount;
    let mut out = Vec::new();
    for lot in lots {
        if remaining == 0 {
            break;
        }
        let take = lot.available().min(remaining);
        if take > 0 {
            out.push((lot.lot_id, take));
            remaining -= take;
        }
    }
    if remaining > 0 {
        None
    } else {
        Some(out)
    }
}

/// Walk `lots` (assumed already ordered LIFO: `created_at` then `lot_id`
/// descending) and greedily claw back `amount` micros from their
/// `available_micro`, reducing `original` by the same amount so lot
/// conservation holds. Returns `None` if the lots don't cover the full
/// amount.
pub fn allocate_lifo(lots: &[LotRow], amount: Micros) -> Option<Vec<(uuid::Uuid, Micros)>> {
    allocate_fifo(lots, amount)
}

/// Total `available_micro` across a set of lots.
pub fn total_available(lots: &[LotRow]) -> Micros {
    lots.iter().map(|l| l.available()).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn lot(available: Micros, reserved: Micros, consumed: Micros) -> LotRow {
        let original = available + reserved + consumed;
        LotRow {
            lot_id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            pool_id: "commands".into(),
            original_micro: original.to_string(),
            available_micro: available.to_string(),
            reserved_micro: reserved.to_string(),
            consumed_micro: consumed.to_string(),
            source: "deposit".into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn fifo_allocates_across_lots_in_order() {
        let lots = vec![lot(100, 0, 0), lot(100, 0, 0)];
        let alloc = allocate_fifo(&lots, 150).unwrap();
        assert_eq!(alloc.len(), 2);
        assert_eq!(alloc[0].1, 100);
        assert_eq!(alloc[1].1, 50);
    }

    #[test]
    fn fifo_fails_when_insufficient() {
        let lots = vec![lot(50, 0, 0)];
        assert!(allocate_fifo(&lots, 100).is_none());
    }

    #[test]
    fn lot_priority_prefers_lot_id_when_both_present() {
        let l = LotId::new();
        let r = ReservationId::new();
        assert_eq!(resolve(Some(l), Some(r)), Some(RefundTarget::Lot(l)));
        assert_eq!(resolve(None, Some(r)), Some(RefundTarget::Reservation(r)));
        assert_eq!(resolve(None, None), None);
    }
}
