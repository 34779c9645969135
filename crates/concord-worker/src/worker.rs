use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use concord_bus::BusConsumer;
use concord_core::{Classify, ErrorKind};

use crate::pipeline::{DispatchContext, Outcome};

/// Drives the poll → dispatch → ack/nack loop for one worker instance.
/// Up to `max_in_flight` deliveries are processed concurrently (§4.3
/// "Concurrency model").
pub struct Worker {
    bus: Arc<dyn BusConsumer>,
    ctx: Arc<DispatchContext>,
    subject_pattern: String,
    max_in_flight: usize,
    poll_batch: i64,
    visible_after_ms: i64,
}

impl Worker {
    pub fn new(
        bus: Arc<dyn BusConsumer>,
        ctx: Arc<DispatchContext>,
        subject_pattern: impl Into<String>,
        max_in_flight: usize,
    ) -> Self {
        Self {
            bus,
            ctx,
            subject_pattern: subject_pattern.into(),
            max_in_flight,
            poll_batch: max_in_flight as i64,
            visible_after_ms: 30_000,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let semaphore = Arc::new(Semaphore::new(self.max_in_flight));
        info!(subject = %self.subject_pattern, max_in_flight = self.max_in_flight, "worker started");

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            let deliveries = match self
                .bus
                .poll(&self.subject_pattern, self.poll_batch, self.visible_after_ms)
                .await
            {
                Ok(d) => d,
                Err(e) => {
                    warn!(error = %e, "bus poll failed, backing off");
                    tokio::time::sleep(Duration::from_millis(500)).await;
                    continue;
                }
            };

            if deliveries.is_empty() {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(200)) => {}
                    _ = shutdown.cancelled() => break,
                }
                continue;
            }

            for delivery in deliveries {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => break,
                };
                let bus = self.bus.clone();
                let ctx = self.ctx.clone();
                let cancel = shutdown.clone();
                tokio::spawn(async move {
                    let _permit = permit;
                    handle_delivery(bus, ctx, delivery, cancel).await;
                });
            }
        }

        info!("worker shutting down, draining in-flight deliveries");
        let _ = semaphore.acquire_many(self.max_in_flight as u32).await;
    }
}

async fn handle_delivery(
    bus: Arc<dyn BusConsumer>,
    ctx: Arc<DispatchContext>,
    delivery: concord_bus::Delivery,
    cancel: CancellationToken,
) {
    let id = delivery.id;
    let result = ctx.dispatch_one(&delivery, cancel).await;

    let ack_result = match result {
        Ok(_) => bus.ack(id).await,
        Err(e) => match ack_action(e.kind()) {
            AckAction::Ack => bus.ack(id).await,
            AckAction::Nack => {
                let backoff_ms = 1_000 * (delivery.delivery_count.max(1) as i64);
                bus.nack(id, &e.to_string(), backoff_ms).await
            }
            AckAction::DeadLetter => bus.dead_letter(id, &e.to_string()).await,
        },
    };

    if let Err(e) = ack_result {
        error!(delivery_id = id, error = %e, "failed to finalize delivery outcome");
    }
}

/// Pure mapping from the §7 error classification onto the bus's
/// ack/nack/dead-letter vocabulary (§4.3 "Failure policy").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AckAction {
    Ack,
    Nack,
    DeadLetter,
}

fn ack_action(kind: ErrorKind) -> AckAction {
    match kind {
        ErrorKind::Transient => AckAction::Nack,
        ErrorKind::Fatal => AckAction::DeadLetter,
        ErrorKind::Policy | ErrorKind::Conflict | ErrorKind::NotFound => AckAction::Ack,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors_nack_for_redelivery() {
        assert_eq!(ack_action(ErrorKind::Transient), AckAction::Nack);
    }

    #[test]
    fn fatal_errors_go_straight_to_dead_letter() {
        assert_eq!(ack_action(ErrorKind::Fatal), AckAction::DeadLetter);
    }

    #[test]
    fn policy_and_conflict_errors_ack_without_retry() {
        assert_eq!(ack_action(ErrorKind::Policy), AckAction::Ack);
        assert_eq!(ack_action(ErrorKind::Conflict), AckAction::Ack);
        assert_eq!(ack_action(ErrorKind::NotFound), AckAction::Ack);
    }
}
