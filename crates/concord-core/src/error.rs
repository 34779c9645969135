use thiserror::Error;

use crate::types::ErrorKind;

/// Errors raised by concord-core itself (protocol negotiation, breaker
/// bookkeeping). Each downstream crate defines its own flat error enum and
/// implements [`Classify`] so the dispatcher can route on [`ErrorKind`]
/// without knowing the originating crate.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("protocol version {0} rejected: below minimum and not in the legacy allow-list")]
    ProtocolVersionRejected(String),

    #[error("circuit breaker open; retry after {retry_after_secs}s")]
    BreakerOpen { retry_after_secs: u64 },
}

/// Maps a domain error onto the cross-cutting classification of §7, which
/// decides retry/ack/nack behavior at the dispatcher.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

impl Classify for CoreError {
    fn kind(&self) -> ErrorKind {
        match self {
            CoreError::ProtocolVersionRejected(_) => ErrorKind::Policy,
            CoreError::BreakerOpen { .. } => ErrorKind::Transient,
        }
    }
}
