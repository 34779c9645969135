//! concord-bus
//!
//! The durable, at-least-once, per-subject FIFO stream of §4.2. Subjects
//! are hierarchical (`events.<type>.<shard>`); within a subject, delivery
//! order matches publish order. [`BusPublisher`]/[`BusConsumer`] are the
//! traits the gateway and worker depend on; [`PgBus`] is the in-process
//! durable implementation backed by `concord-store`'s Postgres pool,
//! generalized from the gossip-topic publish/subscribe shape of a P2P
//! network to a durable queue the way every other entity in this repo is
//! backed by a relational table instead of an embedded store.

pub mod error;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tracing::warn;

use concord_core::EventEnvelope;
pub use error::BusError;

/// A message handed to a consumer, carrying enough metadata to ack/nack.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub id: i64,
    pub subject: String,
    pub envelope: EventEnvelope,
    pub delivery_count: i32,
}

#[async_trait]
pub trait BusPublisher: Send + Sync + 'static {
    async fn publish(&self, subject: &str, envelope: &EventEnvelope) -> Result<(), BusError>;
}

#[async_trait]
pub trait BusConsumer: Send + Sync + 'static {
    /// Pull up to `max` not-yet-acked, currently-visible messages for
    /// `subject_pattern` (`events.%` style SQL LIKE pattern), FIFO per
    /// subject. `max_in_flight` bounds how many messages a single poll call
    /// reserves by hiding them until `visible_after_ms`.
    async fn poll(
        &self,
        subject_pattern: &str,
        max: i64,
        visible_after_ms: i64,
    ) -> Result<Vec<Delivery>, BusError>;

    async fn ack(&self, id: i64) -> Result<(), BusError>;

    /// Nack: either redeliver with a backoff delay, or — past
    /// `concord_core::BUS_MAX_REDELIVERIES` — move to the dead-letter table.
    async fn nack(&self, id: i64, reason: &str, redeliver_after_ms: i64) -> Result<(), BusError>;

    /// Move straight to the dead-letter table regardless of redelivery
    /// count — used for permanent (non-retryable) handler failures.
    async fn dead_letter(&self, id: i64, reason: &str) -> Result<(), BusError>;
}

#[derive(Clone)]
pub struct PgBus {
    pool: PgPool,
}

impl PgBus {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), BusError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl BusPublisher for PgBus {
    async fn publish(&self, subject: &str, envelope: &EventEnvelope) -> Result<(), BusError> {
        let bytes = bincode::serialize(envelope)?;
        sqlx::query(
            "INSERT INTO bus_messages (subject, event_id, envelope) VALUES ($1, $2, $3)",
        )
        .bind(subject)
        .bind(envelope.event_id.to_string())
        .bind(bytes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl BusConsumer for PgBus {
    async fn poll(
        &self,
        subject_pattern: &str,
        max: i64,
        visible_after_ms: i64,
    ) -> Result<Vec<Delivery>, BusError> {
        let now = Utc::now();
        let rows: Vec<(i64, String, Vec<u8>, i32)> = sqlx::query_as(
            r#"
            UPDATE bus_messages
            SET delivery_count = delivery_count + 1,
                visible_at = $1 + ($2 || ' milliseconds')::interval
            WHERE id IN (
                SELECT id FROM bus_messages
                WHERE subject LIKE $3 AND acked = false AND visible_at <= $1
                ORDER BY subject, id
                LIMIT $4
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id, subject, envelope, delivery_count
            "#,
        )
        .bind(now)
        .bind(visible_after_ms.to_string())
        .bind(subject_pattern)
        .bind(max)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for (id, subject, bytes, delivery_count) in rows {
            match bincode::deserialize::<EventEnvelope>(&bytes) {
                Ok(envelope) => out.push(Delivery {
                    id,
                    subject,
                    envelope,
                    delivery_count,
                }),
                Err(e) => warn!(error = %e, id, "dropping bus message with corrupt envelope"),
            }
        }
        Ok(out)
    }

    async fn ack(&self, id: i64) -> Result<(), BusError> {
        sqlx::query("UPDATE bus_messages SET acked = true WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn nack(&self, id: i64, reason: &str, redeliver_after_ms: i64) -> Result<(), BusError> {
        let row: Option<(String, String, Vec<u8>, i32)> = sqlx::query_as(
            "SELECT subject, event_id, envelope, delivery_count FROM bus_messages WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((subject, event_id, envelope, delivery_count)) = row else {
            return Ok(());
        };

        if delivery_count as u32 >= concord_core::BUS_MAX_REDELIVERIES {
            let mut tx = self.pool.begin().await?;
            sqlx::query(
                r#"
                INSERT INTO bus_dead_letters (subject, event_id, envelope, failure_reason, delivery_count)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(&subject)
            .bind(&event_id)
            .bind(&envelope)
            .bind(reason)
            .bind(delivery_count)
            .execute(&mut *tx)
            .await?;
            sqlx::query("UPDATE bus_messages SET acked = true WHERE id = $1")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            tx.commit().await?;
            return Ok(());
        }

        let now = Utc::now();
        sqlx::query(
            "UPDATE bus_messages SET visible_at = $1 + ($2 || ' milliseconds')::interval WHERE id = $3",
        )
        .bind(now)
        .bind(redeliver_after_ms.to_string())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn dead_letter(&self, id: i64, reason: &str) -> Result<(), BusError> {
        let row: Option<(String, String, Vec<u8>, i32)> = sqlx::query_as(
            "SELECT subject, event_id, envelope, delivery_count FROM bus_messages WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some((subject, event_id, envelope, delivery_count)) = row else {
            return Ok(());
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"
            INSERT INTO bus_dead_letters (subject, event_id, envelope, failure_reason, delivery_count)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&subject)
        .bind(&event_id)
        .bind(&envelope)
        .bind(reason)
        .bind(delivery_count)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE bus_messages SET acked = true WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
