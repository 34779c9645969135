use async_trait::async_trait;

use concord_gateway::{GatewayItem, ShardTransport};

/// Stand-in [`ShardTransport`] for deployments that haven't wired a real
/// Discord gateway client yet. The genuine client is a vendored dependency
/// outside this repo's scope (`concord_gateway::transport` doc comment);
/// this impl fails `connect` so the shard session's reconnect backoff and
/// breaker still run end to end against a process that has nothing to talk
/// to, instead of the binary silently doing nothing.
pub struct UnconfiguredTransport;

#[async_trait]
impl ShardTransport for UnconfiguredTransport {
    async fn connect(&mut self, _shard_id: u32, _shard_count: u32) -> Result<(), String> {
        Err("no ShardTransport configured — swap concord_node::transport::UnconfiguredTransport for a real gateway client".to_string())
    }

    async fn next_event(&mut self) -> Result<GatewayItem, String> {
        std::future::pending().await
    }

    async fn close(&mut self) {}
}
