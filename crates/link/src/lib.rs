//! Link-reliability layer for the mesh/overlay message bridge.
//!
//! The bridge relays messages between a radio mesh link and a
//! store-and-forward overlay link. Both are individually unreliable; this
//! crate keeps the relay healthy without owning any transport I/O itself.
//!
//! # Components
//!
//! - **[`resilience::CircuitBreaker`]**: per-link failure gate
//! - **[`resilience::ReconnectStrategy`]**: backoff with jitter plus a
//!   post-recovery slow-start ramp
//! - **[`probe::ActiveHealthProbe`]**: background checks with hysteresis
//! - **[`queue::TxQueue`]**: bounded transmit queue with a drain worker
//! - **[`monitor::BridgeHealthMonitor`]**: cross-link status aggregation
//!
//! [`link::LinkGuard`] wires one link's breaker, strategy and queue into the
//! shared monitor, and [`context::BridgeContext`] is the single object an
//! application builds at start-up and hands to every collaborator.
//!
//! # Example
//!
//! ```rust,no_run
//! use meshgate_link::context::BridgeContext;
//! use meshgate_link::link::LinkGuardConfig;
//! use meshgate_link::queue::send_fn;
//!
//! # async fn example() -> meshgate_link::LinkResult<()> {
//! let ctx = BridgeContext::with_defaults()?;
//! let sender = send_fn(|payload: Vec<u8>| async move {
//!     // hand the payload to the radio driver here
//!     let _ = payload;
//!     Ok::<_, meshgate_link::BoxError>(())
//! });
//! let mut mesh = ctx.link("mesh", LinkGuardConfig::mesh_radio(), sender)?;
//! ctx.start();
//! mesh.start();
//! mesh.submit(b"hello".to_vec())?;
//! mesh.stop(std::time::Duration::from_secs(2)).await?;
//! ctx.stop(std::time::Duration::from_secs(2)).await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

pub mod context;
pub mod error;
pub mod link;
pub mod monitor;
pub mod probe;
pub mod queue;
pub mod resilience;
pub mod serde_utils;
pub mod time;

pub use context::{BridgeContext, BridgeContextConfig, BridgeReport};
pub use error::{BoxError, ConfigError, ConfigResult, LinkError, LinkResult};
pub use link::{LinkGuard, LinkGuardConfig, LinkSnapshot, ReportingSender};
pub use monitor::{
    classify_error, BridgeHealthMonitor, BridgeStatus, BridgeSummary, ConnectionEventKind,
    Direction, ErrorCategory, MonitorConfig,
};
pub use probe::{
    check_fn, ActiveHealthProbe, HealthCheck, HealthResult, HealthState, ProbeConfig, ProbeEvent,
    ServiceStatus,
};
pub use queue::{send_fn, PacketSender, TxQueue, TxQueueConfig};
pub use resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, ReconnectConfig, ReconnectStrategy,
};
pub use time::{Clock, MockClock, SystemClock};
