use std::collections::HashMap;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use concord_core::{EventEnvelope, EventType};

use crate::error::DispatchError;

/// Context handed to a handler: the decoded envelope plus cancellation.
pub struct HandlerContext<'a> {
    pub envelope: &'a EventEnvelope,
    pub cancel: CancellationToken,
}

/// A single event-type's business logic. Handlers may suspend on I/O but
/// must observe `ctx.cancel` so the dispatcher can abandon an in-flight
/// call during shutdown drain.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, ctx: HandlerContext<'_>) -> Result<(), DispatchError>;
}

/// `event_type -> handler`, a plain map populated at startup (§4.3.A) —
/// not a dynamic plugin loader.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<EventType, Box<dyn EventHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, event_type: EventType, handler: Box<dyn EventHandler>) {
        self.handlers.insert(event_type, handler);
    }

    pub fn get(&self, event_type: EventType) -> Option<&dyn EventHandler> {
        self.handlers.get(&event_type).map(|b| b.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::{EventId, SubjectKey, Timestamp};

    struct NoopHandler;

    #[async_trait]
    impl EventHandler for NoopHandler {
        async fn handle(&self, _ctx: HandlerContext<'_>) -> Result<(), DispatchError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn registered_handler_is_found_by_event_type() {
        let mut registry = HandlerRegistry::new();
        registry.register(EventType::MemberAdd, Box::new(NoopHandler));

        assert!(registry.get(EventType::MemberAdd).is_some());
        assert!(registry.get(EventType::GuildCreate).is_none());
    }

    #[tokio::test]
    async fn registered_handler_runs() {
        let mut registry = HandlerRegistry::new();
        registry.register(EventType::Ready, Box::new(NoopHandler));

        let envelope = EventEnvelope {
            event_id: EventId::new(),
            event_type: EventType::Ready,
            shard_id: 0,
            producer_ts: Timestamp::default(),
            subject_key: SubjectKey::global(),
            payload: vec![],
            schema_version: EventEnvelope::CURRENT_SCHEMA_VERSION,
        };
        let handler = registry.get(EventType::Ready).unwrap();
        let result = handler
            .handle(HandlerContext {
                envelope: &envelope,
                cancel: CancellationToken::new(),
            })
            .await;
        assert!(result.is_ok());
    }
}
