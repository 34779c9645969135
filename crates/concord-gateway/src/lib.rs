//! concord-gateway
//!
//! The shard session pool of §4.1: owns one [`shard::ShardSession`] per
//! shard in this process's range, translates raw gateway events into
//! [`concord_core::EventEnvelope`]s with tenant-keyed subject ordering, and
//! publishes them onto `concord-bus`.

pub mod config;
pub mod error;
pub mod normalize;
pub mod shard;
pub mod transport;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use transport::{GatewayItem, RawGatewayEvent, ShardSignal, ShardTransport};

use concord_bus::BusPublisher;
use shard::ShardSession;

/// Owns every shard session in this process's range and runs them
/// concurrently until shutdown is requested.
pub struct ShardPool {
    config: GatewayConfig,
    publisher: Arc<dyn BusPublisher>,
}

impl ShardPool {
    pub fn new(config: GatewayConfig, publisher: Arc<dyn BusPublisher>) -> Self {
        Self { config, publisher }
    }

    /// `Run(ctx, shardRange, totalShards)`: open `shards_per_process`
    /// sessions starting at `shard_range_start`, each driven by a fresh
    /// `transport_factory()` instance, and run them to completion (i.e.
    /// until `shutdown` fires).
    pub async fn run<T, F>(self, transport_factory: F, shutdown: CancellationToken)
    where
        T: ShardTransport,
        F: Fn(u32) -> T,
    {
        let mut handles = Vec::new();
        for offset in 0..self.config.shards_per_process {
            let shard_id = self.config.shard_range_start + offset;
            let transport = transport_factory(shard_id);
            let session = ShardSession::new(
                shard_id,
                self.config.shard_count,
                self.config.clone(),
                transport,
                self.publisher.clone(),
            );
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(session.run(shutdown)));
        }

        info!(shards = handles.len(), "gateway shard pool running");
        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeTransport {
        events: std::vec::IntoIter<GatewayItem>,
    }

    #[async_trait]
    impl ShardTransport for FakeTransport {
        async fn connect(&mut self, _shard_id: u32, _shard_count: u32) -> Result<(), String> {
            Ok(())
        }

        async fn next_event(&mut self) -> Result<GatewayItem, String> {
            match self.events.next() {
                Some(item) => Ok(item),
                None => {
                    futures_pending().await;
                    unreachable!()
                }
            }
        }

        async fn close(&mut self) {}
    }

    async fn futures_pending() {
        std::future::pending::<()>().await
    }

    struct CountingPublisher {
        count: AtomicUsize,
    }

    #[async_trait]
    impl BusPublisher for CountingPublisher {
        async fn publish(
            &self,
            _subject: &str,
            _envelope: &concord_core::EventEnvelope,
        ) -> Result<(), concord_bus::BusError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn routes_events_in_receive_order() {
        let events = vec![
            GatewayItem::Signal(ShardSignal::Ready),
            GatewayItem::Event(RawGatewayEvent {
                kind: "GUILD_CREATE".into(),
                guild_id: Some("g1".into()),
                body: vec![1, 2, 3],
            }),
            GatewayItem::Event(RawGatewayEvent {
                kind: "INTERACTION_CREATE".into(),
                guild_id: Some("g1".into()),
                body: vec![4, 5, 6],
            }),
        ];
        let transport = FakeTransport {
            events: events.into_iter(),
        };
        let publisher = Arc::new(CountingPublisher {
            count: AtomicUsize::new(0),
        });
        let config = GatewayConfig {
            publish_max_retries: 1,
            ..Default::default()
        };
        let session = ShardSession::new(0, 1, config, transport, publisher.clone());
        let shutdown = CancellationToken::new();
        let shutdown_clone = shutdown.clone();
        let handle = tokio::spawn(session.run(shutdown_clone));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        shutdown.cancel();
        let _ = tokio::time::timeout(std::time::Duration::from_secs(1), handle).await;
        assert_eq!(publisher.count.load(Ordering::SeqCst), 2);
    }
}
