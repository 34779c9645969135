use async_trait::async_trait;

/// One relayed event on the agent SSE stream (§6: event types `message.delta`,
/// `message.final`, `usage.report`, `error`), tagged with the monotonic
/// per-connection event id the gateway assigns before forwarding (§4.5 step
/// 6: "preserve event order; emit a unique monotonic event id per
/// connection").
#[derive(Debug, Clone)]
pub struct RelayedEvent {
    pub event_id: u64,
    pub kind: AgentEventKind,
}

#[derive(Debug, Clone)]
pub enum AgentEventKind {
    MessageDelta { text: String },
    MessageFinal { text: String },
    UsageReport { input_tokens: u64, output_tokens: u64 },
    Error { message: String },
}

/// Abstraction over the upstream streaming LLM endpoint. The real agent
/// service is out of scope (§1: "the LLM service itself" is a non-goal);
/// this trait lets [`crate::gateway::AgentGateway`] drive connect →
/// first-byte → stream → close against either a genuine
/// `reqwest`/`reqwest-eventsource` client or a deterministic test fake, the
/// same role `concord_gateway::ShardTransport` plays for the Discord
/// connection.
#[async_trait]
pub trait AgentTransport: Send + Sync {
    /// Open the upstream connection and block until either the connection
    /// is established or `connect_timeout` would be exceeded by the
    /// caller's own timer.
    async fn connect(&mut self, jwt: &str, provider: &str, provider_model_id: &str) -> Result<(), String>;

    /// Block until the next upstream item (event or end-of-stream). Returns
    /// `Ok(None)` on a clean stream end.
    async fn next_event(&mut self) -> Result<Option<RelayedEvent>, String>;

    async fn close(&mut self);
}
