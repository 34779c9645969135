//! concord-agent
//!
//! The agent gateway of §4.5: a streaming LLM proxy that authenticates
//! callers with short-lived ES256 JWTs, classifies and reserves budget
//! against the credit ledger, relays the upstream SSE stream in order, and
//! reconciles usage on a periodic sweep. [`gateway::AgentGateway`] is the
//! entry point; [`keyring::SigningKeyRing`] and [`breaker::ProviderBreakers`]
//! are its two pieces of shared, long-lived state.

pub mod breaker;
pub mod config;
pub mod ensemble;
pub mod error;
pub mod gateway;
pub mod keyring;
pub mod reconcile;
pub mod registry;
pub mod transport;

pub use config::AgentConfig;
pub use error::AgentError;
pub use gateway::{AgentGateway, AgentRequest, InvocationResult};
pub use keyring::{AgentClaims, SigningKey, SigningKeyRing};
pub use registry::{ModelRegistry, ModelSpec};
