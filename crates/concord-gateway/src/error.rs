use thiserror::Error;

use concord_core::{Classify, ErrorKind};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("shard transport error: {0}")]
    Transport(String),

    #[error("bus publish failed: {0}")]
    Bus(#[from] concord_bus::BusError),

    #[error("shard {shard_id} circuit breaker open, retry after {retry_after_ms}ms")]
    BreakerOpen { shard_id: u32, retry_after_ms: u64 },
}

impl Classify for GatewayError {
    fn kind(&self) -> ErrorKind {
        match self {
            GatewayError::Transport(_) => ErrorKind::Transient,
            GatewayError::Bus(e) => e.kind(),
            GatewayError::BreakerOpen { .. } => ErrorKind::Transient,
        }
    }
}
