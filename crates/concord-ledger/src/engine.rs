use std::future::Future;

use chrono::{Duration as ChronoDuration, Utc};
use concord_core::{LedgerEntryType, Micros, PayoutState, ReservationState};
use concord_store::models::{Allocation, LedgerEntryRow, LotRow, PayoutRow, ReservationRow};
use concord_store::Store;
use sqlx::{Postgres, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::LedgerConfig;
use crate::error::LedgerError;
use crate::lots::{self, RefundTarget};

/// Lock the account row with `FOR UPDATE NOWAIT`. Concurrent mutators of the
/// same account fail fast with Postgres error code `55P03` instead of
/// queuing behind the lock; [`LedgerEngine::with_occ_retry`] turns that into
/// a bounded, backed-off retry — the "OCC" of "account/pool OCC" (§4.4).
async fn lock_account(tx: &mut Transaction<'_, Postgres>, account_id: Uuid) -> Result<(), LedgerError> {
    let result = sqlx::query("SELECT account_id FROM credit_accounts WHERE account_id = $1 FOR UPDATE NOWAIT")
        .bind(account_id)
        .fetch_optional(&mut **tx)
        .await;

    match result {
        Ok(Some(_)) => Ok(()),
        Ok(None) => Err(LedgerError::AccountNotFound(account_id)),
        Err(sqlx::Error::Database(e)) if e.code().as_deref() == Some("55P03") => {
            Err(LedgerError::OccConflict(account_id, 0))
        }
        Err(e) => Err(LedgerError::Store(e.into())),
    }
}

async fn bump_occ_version(tx: &mut Transaction<'_, Postgres>, account_id: Uuid) -> Result<(), LedgerError> {
    sqlx::query("UPDATE credit_accounts SET occ_version = occ_version + 1 WHERE account_id = $1")
        .bind(account_id)
        .execute(&mut **tx)
        .await
        .map_err(|e| LedgerError::Store(e.into()))?;
    Ok(())
}

async fn next_entry_seq(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    pool_id: &str,
) -> Result<i64, LedgerError> {
    let seq: Option<i64> = sqlx::query_scalar(
        "SELECT MAX(entry_seq) FROM credit_ledger WHERE account_id = $1 AND pool_id = $2",
    )
    .bind(account_id)
    .bind(pool_id)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| LedgerError::Store(e.into()))?;
    Ok(seq.unwrap_or(0) + 1)
}

async fn insert_ledger_entry(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    pool_id: &str,
    entry_type: LedgerEntryType,
    amount: Micros,
    reference_id: Option<Uuid>,
    finalization_id: Option<&str>,
    metadata: serde_json::Value,
) -> Result<LedgerEntryRow, LedgerError> {
    let entry_seq = next_entry_seq(tx, account_id, pool_id).await?;
    let row = sqlx::query_as::<_, LedgerEntryRow>(
        r#"
        INSERT INTO credit_ledger
            (entry_id, account_id, pool_id, entry_type, amount_micro, reference_id, entry_seq, finalization_id, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(account_id)
    .bind(pool_id)
    .bind(entry_type_str(entry_type))
    .bind(amount.to_string())
    .bind(reference_id)
    .bind(entry_seq)
    .bind(finalization_id)
    .bind(metadata)
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| LedgerError::Store(e.into()))?;
    Ok(row)
}

fn entry_type_str(t: LedgerEntryType) -> &'static str {
    match t {
        LedgerEntryType::Deposit => "deposit",
        LedgerEntryType::Reserve => "reserve",
        LedgerEntryType::Finalize => "finalize",
        LedgerEntryType::Release => "release",
        LedgerEntryType::Refund => "refund",
        LedgerEntryType::Grant => "grant",
        LedgerEntryType::Escrow => "escrow",
        LedgerEntryType::EscrowRelease => "escrow_release",
        LedgerEntryType::ShadowCharge => "shadow_charge",
        LedgerEntryType::CommonsContribution => "commons_contribution",
    }
}

/// The credit ledger & reservation engine (§4.4). Every public method opens
/// one `sqlx::Transaction`, stages its lot/reservation/ledger-entry
/// mutations against it, and commits only after every invariant holds —
/// the same stage-then-commit shape as the reference platform's
/// `StateEngine::apply`, with Postgres row locks standing in for its
/// in-process staging buffer.
#[derive(Clone)]
pub struct LedgerEngine {
    store: Store,
    config: LedgerConfig,
}

impl LedgerEngine {
    pub fn new(store: Store, config: LedgerConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    async fn with_occ_retry<F, Fut, T>(&self, mut op: F) -> Result<T, LedgerError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LedgerError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Err(LedgerError::OccConflict(id, _)) if attempt + 1 < self.config.occ_retry_attempts => {
                    attempt += 1;
                    warn!(account_id = %id, attempt, "occ conflict, retrying");
                    tokio::time::sleep(self.config.occ_retry_backoff).await;
                }
                Err(LedgerError::OccConflict(id, _)) => {
                    return Err(LedgerError::OccConflict(id, self.config.occ_retry_attempts))
                }
                other => return other,
            }
        }
    }

    // ── Deposit ───────────────────────────────────────────────────────────

    pub async fn deposit(
        &self,
        account_id: Uuid,
        pool_id: &str,
        amount: Micros,
        source: concord_core::LotSource,
        finalization_id: Option<&str>,
    ) -> Result<LotRow, LedgerError> {
        self.with_occ_retry(|| self.deposit_once(account_id, pool_id, amount, source, finalization_id))
            .await
    }

    async fn deposit_once(
        &self,
        account_id: Uuid,
        pool_id: &str,
        amount: Micros,
        source: concord_core::LotSource,
        finalization_id: Option<&str>,
    ) -> Result<LotRow, LedgerError> {
        let mut tx = self.store.pool().begin().await.map_err(|e| LedgerError::Store(e.into()))?;
        lock_account(&mut tx, account_id).await?;

        let source_str = match source {
            concord_core::LotSource::Deposit => "deposit",
            concord_core::LotSource::Grant => "grant",
            concord_core::LotSource::Migration => "migration",
        };

        let lot = sqlx::query_as::<_, LotRow>(
            r#"
            INSERT INTO credit_lots (lot_id, account_id, pool_id, original_micro, available_micro, reserved_micro, consumed_micro, source)
            VALUES ($1, $2, $3, $4, $4, '0', '0', $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(account_id)
        .bind(pool_id)
        .bind(amount.to_string())
        .bind(source_str)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| LedgerError::Store(e.into()))?;

        let entry_type = if matches!(source, concord_core::LotSource::Grant) {
            LedgerEntryType::Grant
        } else {
            LedgerEntryType::Deposit
        };
        insert_ledger_entry(
            &mut tx,
            account_id,
            pool_id,
            entry_type,
            amount,
            Some(lot.lot_id),
            finalization_id,
            serde_json::json!({}),
        )
        .await?;

        bump_occ_version(&mut tx, account_id).await?;
        tx.commit().await.map_err(|e| LedgerError::Store(e.into()))?;
        info!(account_id = %account_id, pool_id, amount, "deposit committed");
        Ok(lot)
    }

    // ── Reserve ───────────────────────────────────────────────────────────

    pub async fn reserve(
        &self,
        account_id: Uuid,
        community_id: &str,
        pool_id: &str,
        requested: Micros,
        ttl: ChronoDuration,
    ) -> Result<ReservationRow, LedgerError> {
        self.with_occ_retry(|| self.reserve_once(account_id, community_id, pool_id, requested, ttl))
            .await
    }

    async fn reserve_once(
        &self,
        account_id: Uuid,
        community_id: &str,
        pool_id: &str,
        requested: Micros,
        ttl: ChronoDuration,
    ) -> Result<ReservationRow, LedgerError> {
        let mut tx = self.store.pool().begin().await.map_err(|e| LedgerError::Store(e.into()))?;
        lock_account(&mut tx, account_id).await?;

        let candidate_lots = sqlx::query_as::<_, LotRow>(
            r#"
            SELECT * FROM credit_lots
            WHERE account_id = $1 AND pool_id = $2 AND available_micro::numeric > 0
            ORDER BY created_at ASC, lot_id ASC
            FOR UPDATE
            "#,
        )
        .bind(account_id)
        .bind(pool_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| LedgerError::Store(e.into()))?;

        let available = lots::total_available(&candidate_lots);
        let Some(allocation) = lots::allocate_fifo(&candidate_lots, requested) else {
            return Err(LedgerError::InsufficientFunds {
                requested,
                available,
                shortfall: requested.saturating_sub(available),
            });
        };

        for (lot_id, amount) in &allocation {
            let affected = sqlx::query(
                r#"
                UPDATE credit_lots
                SET available_micro = (available_micro::numeric - $2)::text,
                    reserved_micro = (reserved_micro::numeric + $2)::text
                WHERE lot_id = $1 AND available_micro::numeric >= $2
                "#,
            )
            .bind(lot_id)
            .bind(amount.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| LedgerError::Store(e.into()))?
            .rows_affected();
            if affected != 1 {
                return Err(LedgerError::OccConflict(account_id, 0));
            }
        }

        let allocations: Vec<Allocation> = allocation
            .iter()
            .map(|(lot_id, micro)| Allocation { lot_id: *lot_id, micro: *micro })
            .collect();
        let now = Utc::now();
        let reservation = sqlx::query_as::<_, ReservationRow>(
            r#"
            INSERT INTO credit_reservations (reservation_id, community_id, pool_id, requested_micro, state, allocations, expires_at)
            VALUES ($1, $2, $3, $4, 'pending', $5, $6)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(community_id)
        .bind(pool_id)
        .bind(requested.to_string())
        .bind(serde_json::to_value(&allocations).unwrap_or_default())
        .bind(now + ttl)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| LedgerError::Store(e.into()))?;

        insert_ledger_entry(
            &mut tx,
            account_id,
            pool_id,
            LedgerEntryType::Reserve,
            requested,
            Some(reservation.reservation_id),
            None,
            serde_json::json!({}),
        )
        .await?;

        bump_occ_version(&mut tx, account_id).await?;
        tx.commit().await.map_err(|e| LedgerError::Store(e.into()))?;
        info!(reservation_id = %reservation.reservation_id, requested, "reservation created");
        Ok(reservation)
    }

    // ── Finalize ──────────────────────────────────────────────────────────

    /// Finalize a pending reservation at `actual` micros (`actual <=
    /// requested`). Any unconsumed portion is released back to `available`
    /// in the same transaction. Calling this twice with the same
    /// `finalization_id` on an already-finalized reservation is a no-op
    /// that returns the original reservation (§4.4 duplicate-finalize
    /// semantics).
    pub async fn finalize(
        &self,
        account_id: Uuid,
        reservation_id: Uuid,
        actual: Micros,
        finalization_id: &str,
    ) -> Result<ReservationRow, LedgerError> {
        self.with_occ_retry(|| self.finalize_once(account_id, reservation_id, actual, finalization_id))
            .await
    }

    async fn finalize_once(
        &self,
        account_id: Uuid,
        reservation_id: Uuid,
        actual: Micros,
        finalization_id: &str,
    ) -> Result<ReservationRow, LedgerError> {
        let mut tx = self.store.pool().begin().await.map_err(|e| LedgerError::Store(e.into()))?;
        lock_account(&mut tx, account_id).await?;

        let reservation = sqlx::query_as::<_, ReservationRow>(
            "SELECT * FROM credit_reservations WHERE reservation_id = $1 FOR UPDATE",
        )
        .bind(reservation_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| LedgerError::Store(e.into()))?
        .ok_or(LedgerError::ReservationNotFound(reservation_id))?;

        if reservation.finalization_id.as_deref() == Some(finalization_id)
            && reservation.state() == ReservationState::Finalized
        {
            tx.rollback().await.ok();
            return Ok(reservation);
        }
        if reservation.state() != ReservationState::Pending {
            return Err(LedgerError::ReservationNotPending(reservation_id, reservation.state()));
        }
        if reservation.expires_at < Utc::now() {
            return Err(LedgerError::ReservationExpired(reservation_id));
        }
        if actual > reservation.requested() {
            return Err(LedgerError::InvariantViolated(format!(
                "finalize actual {actual} exceeds reserved {}",
                reservation.requested()
            )));
        }

        let allocations = reservation.allocations();
        let remainder = reservation.requested() - actual;
        let mut consumed_left = actual;
        let mut released_left = remainder;

        for alloc in &allocations {
            let take_consumed = alloc.micro.min(consumed_left);
            let take_release = alloc.micro.saturating_sub(take_consumed).min(released_left);
            consumed_left -= take_consumed;
            released_left -= take_release;

            if take_consumed > 0 {
                sqlx::query(
                    r#"
                    UPDATE credit_lots
                    SET reserved_micro = (reserved_micro::numeric - $2)::text,
                        consumed_micro = (consumed_micro::numeric + $2)::text
                    WHERE lot_id = $1 AND reserved_micro::numeric >= $2
                    "#,
                )
                .bind(alloc.lot_id)
                .bind(take_consumed.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| LedgerError::Store(e.into()))?;
            }
            if take_release > 0 {
                sqlx::query(
                    r#"
                    UPDATE credit_lots
                    SET reserved_micro = (reserved_micro::numeric - $2)::text,
                        available_micro = (available_micro::numeric + $2)::text
                    WHERE lot_id = $1 AND reserved_micro::numeric >= $2
                    "#,
                )
                .bind(alloc.lot_id)
                .bind(take_release.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| LedgerError::Store(e.into()))?;
            }
        }

        if actual > 0 {
            insert_ledger_entry(
                &mut tx,
                account_id,
                &reservation.pool_id,
                LedgerEntryType::Finalize,
                actual,
                Some(reservation_id),
                Some(finalization_id),
                serde_json::json!({}),
            )
            .await?;
        }
        if remainder > 0 {
            insert_ledger_entry(
                &mut tx,
                account_id,
                &reservation.pool_id,
                LedgerEntryType::Release,
                remainder,
                Some(reservation_id),
                None,
                serde_json::json!({"reason": "finalize_remainder"}),
            )
            .await?;
        }

        let updated = sqlx::query_as::<_, ReservationRow>(
            r#"
            UPDATE credit_reservations
            SET state = 'finalized', finalization_id = $2
            WHERE reservation_id = $1
            RETURNING *
            "#,
        )
        .bind(reservation_id)
        .bind(finalization_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| LedgerError::Store(e.into()))?;

        bump_occ_version(&mut tx, account_id).await?;
        tx.commit().await.map_err(|e| LedgerError::Store(e.into()))?;
        info!(reservation_id = %reservation_id, actual, remainder, "reservation finalized");
        Ok(updated)
    }

    // ── Release ───────────────────────────────────────────────────────────

    pub async fn release(&self, account_id: Uuid, reservation_id: Uuid) -> Result<ReservationRow, LedgerError> {
        self.with_occ_retry(|| self.release_once(account_id, reservation_id, "released")).await
    }

    /// Shared by `release` (caller-initiated) and `expire_sweep`
    /// (time-initiated); only the terminal state and log line differ.
    async fn release_once(
        &self,
        account_id: Uuid,
        reservation_id: Uuid,
        terminal_state: &str,
    ) -> Result<ReservationRow, LedgerError> {
        let mut tx = self.store.pool().begin().await.map_err(|e| LedgerError::Store(e.into()))?;
        lock_account(&mut tx, account_id).await?;

        let reservation = sqlx::query_as::<_, ReservationRow>(
            "SELECT * FROM credit_reservations WHERE reservation_id = $1 FOR UPDATE",
        )
        .bind(reservation_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| LedgerError::Store(e.into()))?
        .ok_or(LedgerError::ReservationNotFound(reservation_id))?;

        if reservation.state() != ReservationState::Pending {
            return Err(LedgerError::ReservationNotPending(reservation_id, reservation.state()));
        }

        for alloc in reservation.allocations() {
            sqlx::query(
                r#"
                UPDATE credit_lots
                SET reserved_micro = (reserved_micro::numeric - $2)::text,
                    available_micro = (available_micro::numeric + $2)::text
                WHERE lot_id = $1 AND reserved_micro::numeric >= $2
                "#,
            )
            .bind(alloc.lot_id)
            .bind(alloc.micro.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| LedgerError::Store(e.into()))?;
        }

        insert_ledger_entry(
            &mut tx,
            account_id,
            &reservation.pool_id,
            LedgerEntryType::Release,
            reservation.requested(),
            Some(reservation_id),
            None,
            serde_json::json!({"reason": terminal_state}),
        )
        .await?;

        let updated = sqlx::query_as::<_, ReservationRow>(
            "UPDATE credit_reservations SET state = $2 WHERE reservation_id = $1 RETURNING *",
        )
        .bind(reservation_id)
        .bind(terminal_state)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| LedgerError::Store(e.into()))?;

        bump_occ_version(&mut tx, account_id).await?;
        tx.commit().await.map_err(|e| LedgerError::Store(e.into()))?;
        Ok(updated)
    }

    /// Sweep expired pending reservations back to `available` (§4.4).
    /// Run periodically by `concord-node`'s background scheduler. Each
    /// reservation's owning account is resolved from its first allocated
    /// lot — reservations don't carry an `account_id` column directly
    /// since a reservation's lots already pin it to exactly one account.
    pub async fn expire_sweep(&self) -> Result<u64, LedgerError> {
        let expired = self.store.expired_pending_reservations(Utc::now()).await?;
        let mut swept = 0u64;
        for reservation in expired {
            let Some(first) = reservation.allocations().first().copied() else {
                continue;
            };
            let lot = self
                .store
                .get_lot(first.lot_id)
                .await?
                .ok_or(LedgerError::LotNotFound(first.lot_id))?;
            match self
                .with_occ_retry(|| self.release_once(lot.account_id, reservation.reservation_id, "expired"))
                .await
            {
                Ok(_) => swept += 1,
                Err(LedgerError::ReservationNotPending(..)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(swept)
    }

    // ── Refund ────────────────────────────────────────────────────────────

    /// Claw back `amount` micros LIFO from `account_id`/`pool_id`'s lots.
    /// `lot_id`/`reservation_id` narrow which lots are eligible per
    /// [`lots::resolve`]; both `None` claws back across every lot for the
    /// account/pool in plain LIFO order.
    pub async fn refund(
        &self,
        account_id: Uuid,
        pool_id: &str,
        amount: Micros,
        lot_id: Option<Uuid>,
        reservation_id: Option<Uuid>,
    ) -> Result<Vec<LedgerEntryRow>, LedgerError> {
        self.with_occ_retry(|| self.refund_once(account_id, pool_id, amount, lot_id, reservation_id))
            .await
    }

    async fn refund_once(
        &self,
        account_id: Uuid,
        pool_id: &str,
        amount: Micros,
        lot_id: Option<Uuid>,
        reservation_id: Option<Uuid>,
    ) -> Result<Vec<LedgerEntryRow>, LedgerError> {
        let mut tx = self.store.pool().begin().await.map_err(|e| LedgerError::Store(e.into()))?;
        lock_account(&mut tx, account_id).await?;

        let target = lots::resolve(
            lot_id.map(concord_core::LotId::from_uuid),
            reservation_id.map(concord_core::ReservationId::from_uuid),
        );

        let eligible_lots = match target {
            Some(RefundTarget::Lot(l)) => {
                let lot = sqlx::query_as::<_, LotRow>("SELECT * FROM credit_lots WHERE lot_id = $1 FOR UPDATE")
                    .bind(l.0)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| LedgerError::Store(e.into()))?
                    .ok_or(LedgerError::LotNotFound(l.0))?;
                vec![lot]
            }
            Some(RefundTarget::Reservation(r)) => {
                let reservation = sqlx::query_as::<_, ReservationRow>(
                    "SELECT * FROM credit_reservations WHERE reservation_id = $1",
                )
                .bind(r.0)
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| LedgerError::Store(e.into()))?
                .ok_or(LedgerError::ReservationNotFound(r.0))?;
                let mut out = Vec::new();
                for alloc in reservation.allocations() {
                    let lot = sqlx::query_as::<_, LotRow>("SELECT * FROM credit_lots WHERE lot_id = $1 FOR UPDATE")
                        .bind(alloc.lot_id)
                        .fetch_optional(&mut *tx)
                        .await
                        .map_err(|e| LedgerError::Store(e.into()))?
                        .ok_or(LedgerError::LotNotFound(alloc.lot_id))?;
                    out.push(lot);
                }
                out.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.lot_id.cmp(&a.lot_id)));
                out
            }
            None => sqlx::query_as::<_, LotRow>(
                r#"
                SELECT * FROM credit_lots
                WHERE account_id = $1 AND pool_id = $2
                ORDER BY created_at DESC, lot_id DESC
                FOR UPDATE
                "#,
            )
            .bind(account_id)
            .bind(pool_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| LedgerError::Store(e.into()))?,
        };

        let available = lots::total_available(&eligible_lots);
        let allocation = lots::allocate_lifo(&eligible_lots, amount).ok_or(LedgerError::InsufficientFunds {
            requested: amount,
            available,
            shortfall: amount.saturating_sub(available),
        })?;

        let mut entries = Vec::with_capacity(allocation.len());
        for (lid, micro) in allocation {
            let affected = sqlx::query(
                r#"
                UPDATE credit_lots
                SET available_micro = (available_micro::numeric - $2)::text,
                    original_micro = (original_micro::numeric - $2)::text
                WHERE lot_id = $1 AND available_micro::numeric >= $2
                "#,
            )
            .bind(lid)
            .bind(micro.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| LedgerError::Store(e.into()))?
            .rows_affected();
            if affected != 1 {
                return Err(LedgerError::OccConflict(account_id, 0));
            }
            let entry = insert_ledger_entry(
                &mut tx,
                account_id,
                pool_id,
                LedgerEntryType::Refund,
                micro,
                Some(lid),
                None,
                serde_json::json!({}),
            )
            .await?;
            entries.push(entry);
        }

        bump_occ_version(&mut tx, account_id).await?;
        tx.commit().await.map_err(|e| LedgerError::Store(e.into()))?;
        info!(account_id = %account_id, amount, "refund committed");
        Ok(entries)
    }

    // ── Payout state machine ─────────────────────────────────────────────

    /// Request a payout: escrows `amount` micros FIFO out of `available`
    /// (the funds are consumed immediately, reversible only via
    /// [`Self::payout_fail`]/[`Self::payout_quarantine`]) and guards the
    /// treasury reserve margin (§4.4: outstanding payouts plus this one
    /// must not exceed the treasury's reserve).
    pub async fn payout_request(
        &self,
        account_id: Uuid,
        pool_id: &str,
        amount: Micros,
        provider_id: &str,
    ) -> Result<PayoutRow, LedgerError> {
        self.with_occ_retry(|| self.payout_request_once(account_id, pool_id, amount, provider_id))
            .await
    }

    async fn payout_request_once(
        &self,
        account_id: Uuid,
        pool_id: &str,
        amount: Micros,
        provider_id: &str,
    ) -> Result<PayoutRow, LedgerError> {
        let treasury = self.store.get_treasury().await?;
        let reserve: Micros = treasury.reserve_micro.parse().unwrap_or(0);
        let outstanding: Micros = self
            .store
            .pending_approved_processing_total(account_id)
            .await?
            .parse()
            .unwrap_or(0);
        if outstanding + amount > reserve {
            return Err(LedgerError::TreasuryMarginViolated { reserve, outstanding: outstanding + amount });
        }

        let mut tx = self.store.pool().begin().await.map_err(|e| LedgerError::Store(e.into()))?;
        lock_account(&mut tx, account_id).await?;

        let candidate_lots = sqlx::query_as::<_, LotRow>(
            r#"
            SELECT * FROM credit_lots
            WHERE account_id = $1 AND pool_id = $2 AND available_micro::numeric > 0
            ORDER BY created_at ASC, lot_id ASC
            FOR UPDATE
            "#,
        )
        .bind(account_id)
        .bind(pool_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| LedgerError::Store(e.into()))?;

        let available = lots::total_available(&candidate_lots);
        let allocation = lots::allocate_fifo(&candidate_lots, amount).ok_or(LedgerError::InsufficientFunds {
            requested: amount,
            available,
            shortfall: amount.saturating_sub(available),
        })?;

        let payout_id = Uuid::new_v4();
        for (lot_id, micro) in &allocation {
            sqlx::query(
                r#"
                UPDATE credit_lots
                SET available_micro = (available_micro::numeric - $2)::text,
                    consumed_micro = (consumed_micro::numeric + $2)::text
                WHERE lot_id = $1 AND available_micro::numeric >= $2
                "#,
            )
            .bind(lot_id)
            .bind(micro.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| LedgerError::Store(e.into()))?;
        }

        insert_ledger_entry(
            &mut tx,
            account_id,
            pool_id,
            LedgerEntryType::Escrow,
            amount,
            Some(payout_id),
            None,
            serde_json::json!({"provider_id": provider_id}),
        )
        .await?;

        let payout = sqlx::query_as::<_, PayoutRow>(
            r#"
            INSERT INTO payout_requests (payout_id, account_id, amount_micro, state, provider_id)
            VALUES ($1, $2, $3, 'pending', $4)
            RETURNING *
            "#,
        )
        .bind(payout_id)
        .bind(account_id)
        .bind(amount.to_string())
        .bind(provider_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| LedgerError::Store(e.into()))?;

        bump_occ_version(&mut tx, account_id).await?;
        tx.commit().await.map_err(|e| LedgerError::Store(e.into()))?;
        info!(payout_id = %payout_id, amount, "payout requested");
        Ok(payout)
    }

    async fn payout_transition(
        &self,
        payout_id: Uuid,
        from: &[PayoutState],
        to: PayoutState,
    ) -> Result<PayoutRow, LedgerError> {
        let payout = self
            .store
            .get_payout(payout_id)
            .await?
            .ok_or(LedgerError::PayoutStateConflict(payout_id))?;
        if !from.contains(&payout.state()) {
            return Err(LedgerError::PayoutStateConflict(payout_id));
        }
        let to_str = payout_state_str(to);
        let row = sqlx::query_as::<_, PayoutRow>(
            "UPDATE payout_requests SET state = $2, updated_at = now() WHERE payout_id = $1 RETURNING *",
        )
        .bind(payout_id)
        .bind(to_str)
        .fetch_one(self.store.pool())
        .await
        .map_err(|e| LedgerError::Store(e.into()))?;
        Ok(row)
    }

    pub async fn payout_approve(&self, payout_id: Uuid) -> Result<PayoutRow, LedgerError> {
        self.payout_transition(payout_id, &[PayoutState::Pending], PayoutState::Approved).await
    }

    pub async fn payout_process(&self, payout_id: Uuid) -> Result<PayoutRow, LedgerError> {
        self.payout_transition(payout_id, &[PayoutState::Approved], PayoutState::Processing).await
    }

    pub async fn payout_complete(
        &self,
        payout_id: Uuid,
        provider_payment_id: &str,
    ) -> Result<PayoutRow, LedgerError> {
        let payout = self
            .store
            .get_payout(payout_id)
            .await?
            .ok_or(LedgerError::PayoutStateConflict(payout_id))?;
        if payout.state() != PayoutState::Processing {
            return Err(LedgerError::PayoutStateConflict(payout_id));
        }
        let row = sqlx::query_as::<_, PayoutRow>(
            r#"
            UPDATE payout_requests
            SET state = 'completed', provider_payment_id = $2, updated_at = now()
            WHERE payout_id = $1
            RETURNING *
            "#,
        )
        .bind(payout_id)
        .bind(provider_payment_id)
        .fetch_one(self.store.pool())
        .await
        .map_err(|e| LedgerError::Store(e.into()))?;
        Ok(row)
    }

    /// Reverse the escrowed consumption back to `available` (the opposite
    /// of `payout_request`'s FIFO drain) and mark the payout `failed`.
    pub async fn payout_fail(&self, payout_id: Uuid) -> Result<PayoutRow, LedgerError> {
        self.payout_reverse(payout_id, &[PayoutState::Pending, PayoutState::Approved, PayoutState::Processing], PayoutState::Failed)
            .await
    }

    pub async fn payout_quarantine(&self, payout_id: Uuid) -> Result<PayoutRow, LedgerError> {
        self.payout_reverse(
            payout_id,
            &[PayoutState::Pending, PayoutState::Approved, PayoutState::Processing],
            PayoutState::Quarantined,
        )
        .await
    }

    pub async fn payout_cancel(&self, payout_id: Uuid) -> Result<PayoutRow, LedgerError> {
        self.payout_reverse(payout_id, &[PayoutState::Pending, PayoutState::Approved], PayoutState::Cancelled)
            .await
    }

    async fn payout_reverse(
        &self,
        payout_id: Uuid,
        from: &[PayoutState],
        to: PayoutState,
    ) -> Result<PayoutRow, LedgerError> {
        let payout = self
            .store
            .get_payout(payout_id)
            .await?
            .ok_or(LedgerError::PayoutStateConflict(payout_id))?;
        if !from.contains(&payout.state()) {
            return Err(LedgerError::PayoutStateConflict(payout_id));
        }

        self.with_occ_retry(|| async {
            let mut tx = self.store.pool().begin().await.map_err(|e| LedgerError::Store(e.into()))?;
            lock_account(&mut tx, payout.account_id).await?;

            let pool_id: String = sqlx::query_scalar(
                "SELECT pool_id FROM credit_ledger WHERE entry_type = 'escrow' AND reference_id = $1 LIMIT 1",
            )
            .bind(payout_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| LedgerError::Store(e.into()))?;

            let amount: Micros = payout.amount_micro.parse().unwrap_or(0);
            let lots = sqlx::query_as::<_, LotRow>(
                r#"
                SELECT * FROM credit_lots
                WHERE account_id = $1 AND consumed_micro::numeric > 0
                ORDER BY created_at DESC, lot_id DESC
                FOR UPDATE
                "#,
            )
            .bind(payout.account_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| LedgerError::Store(e.into()))?;

            let mut remaining = amount;
            for lot in &lots {
                if remaining == 0 {
                    break;
                }
                let give_back = lot.consumed().min(remaining);
                if give_back == 0 {
                    continue;
                }
                sqlx::query(
                    r#"
                    UPDATE credit_lots
                    SET consumed_micro = (consumed_micro::numeric - $2)::text,
                        available_micro = (available_micro::numeric + $2)::text
                    WHERE lot_id = $1 AND consumed_micro::numeric >= $2
                    "#,
                )
                .bind(lot.lot_id)
                .bind(give_back.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| LedgerError::Store(e.into()))?;
                remaining -= give_back;
            }

            insert_ledger_entry(
                &mut tx,
                payout.account_id,
                &pool_id,
                LedgerEntryType::EscrowRelease,
                amount - remaining,
                Some(payout_id),
                None,
                serde_json::json!({}),
            )
            .await?;

            bump_occ_version(&mut tx, payout.account_id).await?;
            tx.commit().await.map_err(|e| LedgerError::Store(e.into()))?;
            Ok(())
        })
        .await?;

        self.payout_transition(payout_id, from, to).await
    }

    // ── Reconciliation ───────────────────────────────────────────────────

    /// Post a signed `shadow_charge` entry correcting for drift between
    /// locally recorded invocation cost and a provider's usage report
    /// (§4.5 "Usage reconciliation"). `drift` is signed: positive means the
    /// account was undercharged (the provider billed more than was
    /// finalized locally, so more is consumed now); negative means the
    /// account was overcharged and the surplus is credited back to
    /// `available` on the most recently consumed lot. Idempotent per
    /// `finalization_id` — a second call with the same id is a no-op.
    pub async fn compensate(
        &self,
        account_id: Uuid,
        pool_id: &str,
        drift: concord_core::SignedMicros,
        finalization_id: &str,
        metadata: serde_json::Value,
    ) -> Result<Option<LedgerEntryRow>, LedgerError> {
        if drift == 0 {
            return Ok(None);
        }
        self.with_occ_retry(|| self.compensate_once(account_id, pool_id, drift, finalization_id, metadata.clone()))
            .await
    }

    async fn compensate_once(
        &self,
        account_id: Uuid,
        pool_id: &str,
        drift: concord_core::SignedMicros,
        finalization_id: &str,
        metadata: serde_json::Value,
    ) -> Result<Option<LedgerEntryRow>, LedgerError> {
        let mut tx = self.store.pool().begin().await.map_err(|e| LedgerError::Store(e.into()))?;
        lock_account(&mut tx, account_id).await?;

        let existing: Option<LedgerEntryRow> = sqlx::query_as(
            "SELECT * FROM credit_ledger WHERE entry_type = 'shadow_charge' AND finalization_id = $1 LIMIT 1",
        )
        .bind(finalization_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| LedgerError::Store(e.into()))?;
        if let Some(entry) = existing {
            tx.rollback().await.ok();
            return Ok(Some(entry));
        }

        let magnitude: Micros = drift.unsigned_abs();

        if drift > 0 {
            let candidate_lots = sqlx::query_as::<_, LotRow>(
                r#"
                SELECT * FROM credit_lots
                WHERE account_id = $1 AND pool_id = $2 AND available_micro::numeric > 0
                ORDER BY created_at ASC, lot_id ASC
                FOR UPDATE
                "#,
            )
            .bind(account_id)
            .bind(pool_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| LedgerError::Store(e.into()))?;

            let available = lots::total_available(&candidate_lots);
            let allocation = lots::allocate_fifo(&candidate_lots, magnitude).ok_or(LedgerError::InsufficientFunds {
                requested: magnitude,
                available,
                shortfall: magnitude.saturating_sub(available),
            })?;
            for (lot_id, micro) in allocation {
                sqlx::query(
                    r#"
                    UPDATE credit_lots
                    SET available_micro = (available_micro::numeric - $2)::text,
                        consumed_micro = (consumed_micro::numeric + $2)::text
                    WHERE lot_id = $1 AND available_micro::numeric >= $2
                    "#,
                )
                .bind(lot_id)
                .bind(micro.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| LedgerError::Store(e.into()))?;
            }
        } else {
            let lots = sqlx::query_as::<_, LotRow>(
                r#"
                SELECT * FROM credit_lots
                WHERE account_id = $1 AND pool_id = $2 AND consumed_micro::numeric > 0
                ORDER BY created_at DESC, lot_id DESC
                FOR UPDATE
                "#,
            )
            .bind(account_id)
            .bind(pool_id)
            .fetch_all(&mut *tx)
            .await
            .map_err(|e| LedgerError::Store(e.into()))?;

            let mut remaining = magnitude;
            for lot in &lots {
                if remaining == 0 {
                    break;
                }
                let give_back = lot.consumed().min(remaining);
                if give_back == 0 {
                    continue;
                }
                sqlx::query(
                    r#"
                    UPDATE credit_lots
                    SET consumed_micro = (consumed_micro::numeric - $2)::text,
                        available_micro = (available_micro::numeric + $2)::text
                    WHERE lot_id = $1 AND consumed_micro::numeric >= $2
                    "#,
                )
                .bind(lot.lot_id)
                .bind(give_back.to_string())
                .execute(&mut *tx)
                .await
                .map_err(|e| LedgerError::Store(e.into()))?;
                remaining -= give_back;
            }
        }

        let entry = insert_ledger_entry(
            &mut tx,
            account_id,
            pool_id,
            LedgerEntryType::ShadowCharge,
            magnitude,
            None,
            Some(finalization_id),
            metadata,
        )
        .await?;

        bump_occ_version(&mut tx, account_id).await?;
        tx.commit().await.map_err(|e| LedgerError::Store(e.into()))?;
        info!(account_id = %account_id, drift, "reconciliation compensation posted");
        Ok(Some(entry))
    }
}

fn payout_state_str(s: PayoutState) -> &'static str {
    match s {
        PayoutState::Pending => "pending",
        PayoutState::Approved => "approved",
        PayoutState::Processing => "processing",
        PayoutState::Completed => "completed",
        PayoutState::Failed => "failed",
        PayoutState::Quarantined => "quarantined",
        PayoutState::Cancelled => "cancelled",
    }
}
