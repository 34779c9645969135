pub mod breaker;
pub mod constants;
pub mod error;
pub mod protocol;
pub mod types;

pub use breaker::{Breaker, BreakerConfig, BreakerState};
pub use constants::*;
pub use error::{Classify, CoreError};
pub use types::*;
