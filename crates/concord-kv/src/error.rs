use thiserror::Error;

use concord_core::{Classify, ErrorKind};

#[derive(Debug, Error)]
pub enum KvError {
    #[error("shared cache unavailable: {0}")]
    Unavailable(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Classify for KvError {
    fn kind(&self) -> ErrorKind {
        // Fail-closed policy (§5): when the rate-limit or lock service is
        // down, callers must surface a typed transient/unavailable error,
        // never silently fall through to an unlocked path.
        ErrorKind::Transient
    }
}
