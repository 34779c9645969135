//! concord-store
//!
//! The relational ledger schema of §6: `credit_accounts`, `credit_lots`,
//! `credit_reservations`, `credit_ledger`, `payout_requests`,
//! `treasury_state`, `webhook_events`, `billing_notifications`,
//! `revenue_rule_audit_log`, plus the worker's seen-set/outcome tables and
//! the agent gateway's invocation log. One `sqlx` migration file
//! (`migrations/0001_init.sql`) owns the schema; [`Store`] exposes a typed
//! method per read/write path. Cross-table transactions (reserve, finalize,
//! release, refund) are composed by `concord-ledger` directly against
//! [`Store::pool`].

pub mod db;
pub mod error;
pub mod models;

pub use db::Store;
pub use error::StoreError;
