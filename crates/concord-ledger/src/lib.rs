//! concord-ledger
//!
//! The credit ledger & reservation engine of §4.4: double-entry accounting
//! over lots and pools, the reservation lifecycle (reserve → finalize /
//! release / refund), and the payout state machine of §4.4's diagram.
//! [`engine::LedgerEngine`] is the sole write path — every public method
//! stages its mutations inside one `sqlx::Transaction`, validates the I-1..
//! I-5 invariants, and commits or rolls back as a unit, the same
//! stage-then-commit shape the reference platform's `StateEngine::apply`
//! uses for its batched state transitions.

pub mod config;
pub mod engine;
pub mod error;
pub mod invariants;
pub mod lots;

pub use config::LedgerConfig;
pub use engine::LedgerEngine;
pub use error::LedgerError;
