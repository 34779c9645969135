use async_trait::async_trait;

/// A raw event as received from the upstream gateway connection, before
/// normalization into a bus [`concord_core::EventEnvelope`].
#[derive(Debug, Clone)]
pub struct RawGatewayEvent {
    pub kind: String,
    pub guild_id: Option<String>,
    pub body: Vec<u8>,
}

/// Lifecycle signal emitted by a shard's connection in place of an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShardSignal {
    Connecting,
    Ready,
    HeartbeatAck,
    Disconnected { reason: String },
}

/// Abstraction over the upstream gateway connection for one shard. A real
/// Discord gateway WebSocket client is a vendored dependency out of scope
/// here (§1); this trait lets the shard session drive connect → identify →
/// ready → event loop → reconnect against either the genuine client or a
/// deterministic test fake.
#[async_trait]
pub trait ShardTransport: Send + Sync + 'static {
    /// Establish the connection and complete the identify handshake.
    async fn connect(&mut self, shard_id: u32, shard_count: u32) -> Result<(), String>;

    /// Block until the next event or lifecycle signal is available.
    async fn next_event(&mut self) -> Result<GatewayItem, String>;

    async fn close(&mut self);
}

#[derive(Debug, Clone)]
pub enum GatewayItem {
    Event(RawGatewayEvent),
    Signal(ShardSignal),
}
