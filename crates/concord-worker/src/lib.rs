//! concord-worker
//!
//! The LVVER dispatch pipeline of §4.3: decode, attach tenant context,
//! acquire an idempotency lock, enforce the replay window and persistent
//! seen-set, consume a rate-limit unit, invoke the registered handler, and
//! record the outcome. [`pipeline::DispatchContext`] is the pure pipeline;
//! [`worker::Worker`] is the poll/ack/nack loop that drives it against a
//! live [`concord_bus::BusConsumer`].

pub mod error;
pub mod pipeline;
pub mod registry;
pub mod worker;

pub use error::DispatchError;
pub use pipeline::{DispatchContext, Outcome};
pub use registry::{EventHandler, HandlerContext, HandlerRegistry};
pub use worker::Worker;
