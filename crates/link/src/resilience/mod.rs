//! Per-link failure gating and reconnect scheduling.
//!
//! - [`CircuitBreaker`] stops sends to a link that keeps failing.
//! - [`ReconnectStrategy`] spaces out reconnect attempts and ramps throughput
//!   back up after a recovery.
//!
//! Both are leaf components: they own no tasks and do no I/O.

pub mod circuit_breaker;
pub mod reconnect;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerConfigBuilder, CircuitBreakerSnapshot,
    CircuitState,
};
pub use reconnect::{
    ReconnectConfig, ReconnectConfigBuilder, ReconnectSnapshot, ReconnectStrategy,
    SLOW_START_FLOOR,
};
