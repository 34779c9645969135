use thiserror::Error;

use concord_core::{Classify, ErrorKind, Micros};

/// Agent-gateway error taxonomy (§4.5, §7), one flat enum grouped by
/// request-pipeline step, the same shape `concord-worker::DispatchError`
/// uses for the LVVER pipeline.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("unknown model alias: {0}")]
    UnknownModelAlias(String),

    #[error("budget exceeded: requested {requested}, available {available}, shortfall {shortfall}")]
    BudgetExceeded {
        requested: Micros,
        available: Micros,
        shortfall: Micros,
    },

    #[error("ledger error: {0}")]
    Ledger(#[from] concord_ledger::LedgerError),

    #[error("store error: {0}")]
    Store(#[from] concord_store::StoreError),

    #[error("signing key error: {0}")]
    Signing(String),

    #[error("provider circuit breaker open for {0}")]
    BreakerOpen(String),

    #[error("upstream connect timeout")]
    ConnectTimeout,

    #[error("upstream first-byte timeout")]
    FirstByteTimeout,

    #[error("upstream total timeout")]
    TotalTimeout,

    #[error("upstream transport error: {0}")]
    Upstream(String),

    #[error("request cancelled")]
    Cancelled,
}

impl Classify for AgentError {
    fn kind(&self) -> ErrorKind {
        match self {
            AgentError::UnknownModelAlias(_) => ErrorKind::Policy,
            AgentError::BudgetExceeded { .. } => ErrorKind::Policy,
            AgentError::Ledger(e) => e.kind(),
            AgentError::Store(e) => e.kind(),
            AgentError::Signing(_) => ErrorKind::Fatal,
            AgentError::BreakerOpen(_) => ErrorKind::Transient,
            AgentError::ConnectTimeout | AgentError::FirstByteTimeout | AgentError::TotalTimeout => {
                ErrorKind::Transient
            }
            AgentError::Upstream(_) => ErrorKind::Transient,
            AgentError::Cancelled => ErrorKind::Conflict,
        }
    }
}
