use thiserror::Error;

use concord_core::{Classify, ErrorKind};

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus unavailable: {0}")]
    Db(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

impl Classify for BusError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Transient
    }
}
