use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use concord_bus::BusPublisher;
use concord_core::{Breaker, BreakerConfig, EventEnvelope};

use crate::config::GatewayConfig;
use crate::normalize::{normalize, subject_for};
use crate::transport::{GatewayItem, ShardSignal, ShardTransport};

/// One shard's connect → identify → ready → event loop → reconnect state
/// machine, modeled on the reference platform's `P2pNetwork::run`
/// (`tokio::select!` over an outbound channel and the connection's next
/// event) generalized from a libp2p swarm to a single gateway shard.
pub struct ShardSession<T: ShardTransport> {
    shard_id: u32,
    shard_count: u32,
    config: GatewayConfig,
    transport: T,
    publisher: Arc<dyn BusPublisher>,
    breaker: Breaker,
    buffer: VecDeque<EventEnvelope>,
    dropped_total: u64,
}

impl<T: ShardTransport> ShardSession<T> {
    pub fn new(
        shard_id: u32,
        shard_count: u32,
        config: GatewayConfig,
        transport: T,
        publisher: Arc<dyn BusPublisher>,
    ) -> Self {
        let breaker = Breaker::new(BreakerConfig {
            window_size: config.breaker_error_threshold as usize,
            error_rate_threshold: 1.0,
            cooldown: Duration::from_secs(config.breaker_cooldown_secs),
        });
        Self {
            shard_id,
            shard_count,
            config,
            transport,
            publisher,
            breaker,
            buffer: VecDeque::new(),
            dropped_total: 0,
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.config.backoff_base_secs as f64;
        let cap = self.config.backoff_cap_secs as f64;
        let exp = base * 2f64.powi(attempt as i32);
        let bounded = exp.min(cap);
        let jitter = self.config.backoff_jitter_pct;
        let factor = 1.0 + rand::thread_rng().gen_range(-jitter..=jitter);
        Duration::from_secs_f64((bounded * factor).max(0.0))
    }

    /// Drive this shard until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut attempt: u32 = 0;
        loop {
            if shutdown.is_cancelled() {
                return;
            }

            info!(shard_id = self.shard_id, "connecting");
            metrics::counter!("gateway_shard_connect_attempts_total", "shard" => self.shard_id.to_string()).increment(1);

            if let Err(e) = self.transport.connect(self.shard_id, self.shard_count).await {
                warn!(shard_id = self.shard_id, error = %e, "shard connect failed");
                attempt += 1;
                let delay = self.backoff_delay(attempt);
                tokio::select! {
                    _ = sleep(delay) => continue,
                    _ = shutdown.cancelled() => return,
                }
            }
            attempt = 0;
            info!(shard_id = self.shard_id, "ready");
            metrics::gauge!("gateway_shards_ready", "shard" => self.shard_id.to_string()).set(1.0);

            let disconnect_reason = self.event_loop(&shutdown).await;
            metrics::gauge!("gateway_shards_ready", "shard" => self.shard_id.to_string()).set(0.0);

            if shutdown.is_cancelled() {
                self.transport.close().await;
                return;
            }

            warn!(shard_id = self.shard_id, reason = %disconnect_reason, "shard disconnected, reconnecting");
        }
    }

    /// Returns once the transport signals disconnect (or shutdown fires).
    async fn event_loop(&mut self, shutdown: &CancellationToken) -> String {
        loop {
            self.flush_buffer().await;

            tokio::select! {
                item = self.transport.next_event() => {
                    match item {
                        Ok(GatewayItem::Event(raw)) => {
                            metrics::counter!("gateway_events_received_total", "shard" => self.shard_id.to_string()).increment(1);
                            let envelope = normalize(&raw, self.shard_id);
                            self.route(envelope).await;
                        }
                        Ok(GatewayItem::Signal(ShardSignal::HeartbeatAck)) => {
                            debug!(shard_id = self.shard_id, "heartbeat ack");
                        }
                        Ok(GatewayItem::Signal(ShardSignal::Ready)) => {
                            info!(shard_id = self.shard_id, "ready signal");
                        }
                        Ok(GatewayItem::Signal(ShardSignal::Connecting)) => {}
                        Ok(GatewayItem::Signal(ShardSignal::Disconnected { reason })) => {
                            return reason;
                        }
                        Err(e) => {
                            return e;
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    return "shutdown".to_string();
                }
            }
        }
    }

    async fn route(&mut self, envelope: EventEnvelope) {
        let subject = subject_for(&envelope);

        if !self.breaker.allow() {
            metrics::counter!("gateway_route_failures_total", "shard" => self.shard_id.to_string()).increment(1);
            self.buffer_event(envelope);
            return;
        }

        let mut last_err = None;
        for _ in 0..self.config.publish_max_retries {
            match self.publisher.publish(&subject, &envelope).await {
                Ok(()) => {
                    self.breaker.record(false);
                    metrics::counter!("gateway_events_routed_total", "shard" => self.shard_id.to_string()).increment(1);
                    return;
                }
                Err(e) => last_err = Some(e),
            }
        }

        self.breaker.record(true);
        metrics::counter!("gateway_route_failures_total", "shard" => self.shard_id.to_string()).increment(1);
        warn!(shard_id = self.shard_id, error = ?last_err, "publish retries exhausted, buffering");
        self.buffer_event(envelope);
    }

    fn buffer_event(&mut self, envelope: EventEnvelope) {
        if self.buffer.len() >= self.config.publish_buffer_cap {
            self.buffer.pop_front();
            self.dropped_total += 1;
            metrics::counter!("gateway_events_dropped_total", "shard" => self.shard_id.to_string()).increment(1);
        }
        self.buffer.push_back(envelope);
    }

    async fn flush_buffer(&mut self) {
        if self.buffer.is_empty() || !self.breaker.allow() {
            return;
        }
        while let Some(envelope) = self.buffer.front().cloned() {
            let subject = subject_for(&envelope);
            match self.publisher.publish(&subject, &envelope).await {
                Ok(()) => {
                    self.breaker.record(false);
                    self.buffer.pop_front();
                }
                Err(_) => {
                    self.breaker.record(true);
                    break;
                }
            }
        }
    }
}
