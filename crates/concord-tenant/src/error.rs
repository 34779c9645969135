use thiserror::Error;

use concord_core::{Classify, ErrorKind};

#[derive(Debug, Error)]
pub enum TenantError {
    #[error("tenant store error: {0}")]
    Store(#[from] concord_store::StoreError),

    #[error("shared cache error: {0}")]
    Cache(#[from] concord_kv::KvError),

    #[error("unknown tenant: {0}")]
    UnknownTenant(String),
}

impl Classify for TenantError {
    fn kind(&self) -> ErrorKind {
        match self {
            TenantError::Store(e) => e.kind(),
            TenantError::Cache(e) => e.kind(),
            TenantError::UnknownTenant(_) => ErrorKind::NotFound,
        }
    }
}
