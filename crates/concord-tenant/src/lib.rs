//! concord-tenant
//!
//! The tenant-config cache and sliding-window rate limiter of §4.6: a
//! two-level cache (in-process `moka` over a shared `concord-kv` layer)
//! in front of the store of record, plus [`RateLimiter`], a thin wrapper
//! over [`concord_kv::SharedCache::consume_sliding_window`].

pub mod cache;
pub mod config;
pub mod error;
pub mod limiter;

pub use cache::TenantCache;
pub use config::TenantConfig;
pub use error::TenantError;
pub use limiter::{RateLimitDecision, RateLimiter, Window};
