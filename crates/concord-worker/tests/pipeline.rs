//! LVVER pipeline branch coverage (§4.3.A): one test per pipeline outcome,
//! against a real migrated Postgres instance (seen-set and outcomes are
//! persistent per §4.3 step 5/8) and the in-memory `FakeCache` for the
//! shared rate-limit/lock layer.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;

use concord_bus::Delivery;
use concord_core::{EventEnvelope, EventId, EventType, SubjectKey};
use concord_kv::fake::FakeCache;
use concord_store::Store;
use concord_tenant::{RateLimiter, TenantCache};
use concord_worker::error::DispatchError;
use concord_worker::pipeline::{DispatchContext, Outcome};
use concord_worker::registry::{EventHandler, HandlerContext, HandlerRegistry};

struct AlwaysOk;
#[async_trait]
impl EventHandler for AlwaysOk {
    async fn handle(&self, _ctx: HandlerContext<'_>) -> Result<(), DispatchError> {
        Ok(())
    }
}

struct AlwaysTransient;
#[async_trait]
impl EventHandler for AlwaysTransient {
    async fn handle(&self, _ctx: HandlerContext<'_>) -> Result<(), DispatchError> {
        Err(DispatchError::HandlerTransient("upstream timeout".into()))
    }
}

struct AlwaysPermanent;
#[async_trait]
impl EventHandler for AlwaysPermanent {
    async fn handle(&self, _ctx: HandlerContext<'_>) -> Result<(), DispatchError> {
        Err(DispatchError::HandlerPermanent("unrecoverable payload".into()))
    }
}

fn envelope(event_type: EventType, producer_ts: chrono::DateTime<Utc>) -> EventEnvelope {
    EventEnvelope {
        event_id: EventId::new(),
        event_type,
        shard_id: 0,
        producer_ts,
        subject_key: SubjectKey::for_tenant(&"tenant-a".into()),
        payload: vec![],
        schema_version: EventEnvelope::CURRENT_SCHEMA_VERSION,
    }
}

fn build_context(pool: PgPool, handler: Box<dyn EventHandler>, event_type: EventType) -> DispatchContext {
    let store = Arc::new(Store::from_pool(pool));
    let cache = Arc::new(FakeCache::default());
    let tenant_cache = Arc::new(TenantCache::new(cache.clone(), store.clone()));
    let limiter = Arc::new(RateLimiter::new(cache.clone()));
    let mut registry = HandlerRegistry::new();
    registry.register(event_type, handler);

    DispatchContext {
        cache,
        store,
        tenant_cache,
        limiter: limiter.clone(),
        registry: Arc::new(registry),
    }
}

fn delivery_for(envelope: EventEnvelope) -> Delivery {
    Delivery {
        id: 1,
        subject: "events.test.0".into(),
        envelope,
        delivery_count: 1,
    }
}

#[sqlx::test(migrations = "../concord-store/migrations")]
async fn happy_path_runs_handler_and_records_success(pool: PgPool) {
    let ctx = build_context(pool, Box::new(AlwaysOk), EventType::MemberAdd);
    let delivery = delivery_for(envelope(EventType::MemberAdd, Utc::now()));

    let outcome = ctx.dispatch_one(&delivery, CancellationToken::new()).await.unwrap();
    assert_eq!(outcome, Outcome::Success);
}

#[sqlx::test(migrations = "../concord-store/migrations")]
async fn duplicate_event_id_is_not_reexecuted(pool: PgPool) {
    let ctx = build_context(pool, Box::new(AlwaysOk), EventType::MemberAdd);
    let env = envelope(EventType::MemberAdd, Utc::now());
    let delivery = delivery_for(env);

    let first = ctx.dispatch_one(&delivery, CancellationToken::new()).await.unwrap();
    assert_eq!(first, Outcome::Success);

    // Same event id again: the persistent seen-set (not the lock, which
    // has already been released) catches the duplicate.
    let second = ctx.dispatch_one(&delivery, CancellationToken::new()).await.unwrap();
    assert_eq!(second, Outcome::Duplicate);
}

#[sqlx::test(migrations = "../concord-store/migrations")]
async fn replay_window_rejects_stale_events(pool: PgPool) {
    let ctx = build_context(pool, Box::new(AlwaysOk), EventType::MemberAdd);
    let stale_ts = Utc::now() - ChronoDuration::seconds(600);
    let delivery = delivery_for(envelope(EventType::MemberAdd, stale_ts));

    let result = ctx.dispatch_one(&delivery, CancellationToken::new()).await;
    assert!(matches!(result, Err(DispatchError::Malformed(_))));
}

#[sqlx::test(migrations = "../concord-store/migrations")]
async fn rate_limit_exceeded_yields_rate_limited_outcome(pool: PgPool) {
    let ctx = build_context(pool, Box::new(AlwaysOk), EventType::MemberAdd);

    // Free tier defaults to 20/minute; exhaust it, then expect the next
    // distinct event to be rejected.
    for _ in 0..20 {
        let delivery = delivery_for(envelope(EventType::MemberAdd, Utc::now()));
        let outcome = ctx.dispatch_one(&delivery, CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, Outcome::Success);
    }

    let delivery = delivery_for(envelope(EventType::MemberAdd, Utc::now()));
    let outcome = ctx.dispatch_one(&delivery, CancellationToken::new()).await.unwrap();
    assert!(matches!(outcome, Outcome::RateLimited { .. }));
}

#[sqlx::test(migrations = "../concord-store/migrations")]
async fn transient_handler_error_propagates_for_redelivery(pool: PgPool) {
    let ctx = build_context(pool, Box::new(AlwaysTransient), EventType::InteractionCreate);
    let delivery = delivery_for(envelope(EventType::InteractionCreate, Utc::now()));

    let result = ctx.dispatch_one(&delivery, CancellationToken::new()).await;
    assert!(matches!(result, Err(DispatchError::HandlerTransient(_))));
}

#[sqlx::test(migrations = "../concord-store/migrations")]
async fn permanent_handler_error_propagates_for_dead_letter(pool: PgPool) {
    let ctx = build_context(pool, Box::new(AlwaysPermanent), EventType::InteractionCreate);
    let delivery = delivery_for(envelope(EventType::InteractionCreate, Utc::now()));

    let result = ctx.dispatch_one(&delivery, CancellationToken::new()).await;
    assert!(matches!(result, Err(DispatchError::HandlerPermanent(_))));
}
