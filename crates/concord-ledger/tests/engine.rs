//! Seed scenarios from §8 against a real migrated Postgres instance, the
//! same `#[sqlx::test]` idiom `concord-worker`'s pipeline tests use.

use chrono::Duration as ChronoDuration;
use sqlx::PgPool;

use concord_core::LotSource;
use concord_ledger::{LedgerConfig, LedgerEngine, LedgerError};
use concord_store::Store;

async fn setup(pool: PgPool) -> (LedgerEngine, Store, uuid::Uuid) {
    let store = Store::from_pool(pool);
    store
        .upsert_community("tenant-a", "free", Some(20), Some(300), Some(2_000))
        .await
        .unwrap();
    let account = store
        .create_account("tenant-a", "tenant_main", None)
        .await
        .unwrap();
    let engine = LedgerEngine::new(store.clone(), LedgerConfig::default());
    (engine, store, account.account_id)
}

#[sqlx::test(migrations = "../concord-store/migrations")]
async fn happy_path_reservation(pool: PgPool) {
    let (engine, store, account_id) = setup(pool).await;

    engine
        .deposit(account_id, "commands", 10_000_000, LotSource::Deposit, None)
        .await
        .unwrap();

    let reservation = engine
        .reserve(account_id, "tenant-a", "commands", 1_000_000, ChronoDuration::minutes(5))
        .await
        .unwrap();

    let finalized = engine
        .finalize(account_id, reservation.reservation_id, 800_000, "fin-1")
        .await
        .unwrap();
    assert_eq!(finalized.state(), concord_core::ReservationState::Finalized);

    let lots = store.lots_fifo(account_id, "commands").await.unwrap();
    assert_eq!(lots.len(), 1);
    assert_eq!(lots[0].available(), 9_200_000);
    assert_eq!(lots[0].reserved(), 0);
    assert_eq!(lots[0].consumed(), 800_000);

    let entries = engine
        .refund(account_id, "commands", 800_000, None, None)
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);

    let lots = store.lots_fifo(account_id, "commands").await.unwrap();
    assert_eq!(lots[0].available(), 9_200_000);
    assert_eq!(lots[0].original(), 9_200_000);
}

#[sqlx::test(migrations = "../concord-store/migrations")]
async fn reserve_then_release_restores_lot_state(pool: PgPool) {
    let (engine, store, account_id) = setup(pool).await;
    engine
        .deposit(account_id, "commands", 5_000_000, LotSource::Deposit, None)
        .await
        .unwrap();

    let reservation = engine
        .reserve(account_id, "tenant-a", "commands", 2_000_000, ChronoDuration::minutes(5))
        .await
        .unwrap();
    engine.release(account_id, reservation.reservation_id).await.unwrap();

    let lots = store.lots_fifo(account_id, "commands").await.unwrap();
    assert_eq!(lots[0].available(), 5_000_000);
    assert_eq!(lots[0].reserved(), 0);
}

#[sqlx::test(migrations = "../concord-store/migrations")]
async fn duplicate_finalize_returns_original_result(pool: PgPool) {
    let (engine, _store, account_id) = setup(pool).await;
    engine
        .deposit(account_id, "commands", 1_000_000, LotSource::Deposit, None)
        .await
        .unwrap();
    let reservation = engine
        .reserve(account_id, "tenant-a", "commands", 500_000, ChronoDuration::minutes(5))
        .await
        .unwrap();

    let first = engine
        .finalize(account_id, reservation.reservation_id, 400_000, "fin-dup")
        .await
        .unwrap();
    let second = engine
        .finalize(account_id, reservation.reservation_id, 400_000, "fin-dup")
        .await
        .unwrap();

    assert_eq!(first.reservation_id, second.reservation_id);
    assert_eq!(first.state(), second.state());
}

#[sqlx::test(migrations = "../concord-store/migrations")]
async fn insufficient_funds_returns_shortfall(pool: PgPool) {
    let (engine, _store, account_id) = setup(pool).await;
    engine
        .deposit(account_id, "commands", 100_000, LotSource::Deposit, None)
        .await
        .unwrap();

    let err = engine
        .reserve(account_id, "tenant-a", "commands", 1_000_000, ChronoDuration::minutes(5))
        .await
        .unwrap_err();

    match err {
        LedgerError::InsufficientFunds { shortfall, .. } => assert_eq!(shortfall, 900_000),
        other => panic!("expected InsufficientFunds, got {other:?}"),
    }
}

#[sqlx::test(migrations = "../concord-store/migrations")]
async fn expire_sweep_releases_expired_reservations(pool: PgPool) {
    let (engine, store, account_id) = setup(pool).await;
    engine
        .deposit(account_id, "commands", 1_000_000, LotSource::Deposit, None)
        .await
        .unwrap();
    engine
        .reserve(account_id, "tenant-a", "commands", 500_000, ChronoDuration::seconds(-1))
        .await
        .unwrap();

    let swept = engine.expire_sweep().await.unwrap();
    assert_eq!(swept, 1);

    let lots = store.lots_fifo(account_id, "commands").await.unwrap();
    assert_eq!(lots[0].available(), 1_000_000);
}
