//! Error types for the link-reliability layer.
//!
//! Two families live here:
//!
//! - [`ConfigError`]: returned by every `*Config::validate()` and builder
//!   `build()`; construction is the only place this crate rejects input.
//! - [`LinkError`]: lifecycle failures of the background workers and the
//!   link guard (shutdown timeout, worker panic, open breaker).
//!
//! Failures of caller-supplied collaborators (send functions, health checks)
//! travel as [`BoxError`]. They are classified and recorded, never propagated
//! out of a worker.

use std::any::Any;
use std::time::Duration;

use thiserror::Error;

/// Boxed error produced by transport collaborators.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Result alias for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result alias for lifecycle operations.
pub type LinkResult<T> = Result<T, LinkError>;

/// Rejected configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A field holds a value outside its allowed range.
    #[error("Invalid configuration for '{field}': {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid { field, message: message.into() }
    }
}

/// Lifecycle and gating errors.
#[derive(Debug, Error)]
pub enum LinkError {
    /// Construction received an invalid configuration.
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    /// The worker did not exit within the stop timeout. It has been signalled
    /// and will exit at its next iteration boundary.
    #[error("{worker} did not stop within {timeout:?}")]
    ShutdownTimeout { worker: &'static str, timeout: Duration },

    /// The worker task panicked; its join handle reported the panic.
    #[error("{worker} task panicked: {message}")]
    WorkerPanicked { worker: &'static str, message: String },

    /// The circuit breaker for a link rejected the request.
    #[error("Circuit breaker open for link '{link}'")]
    CircuitOpen { link: String },

    /// The transmit queue for a link is full; the packet was dropped.
    #[error("Transmit queue full for link '{link}'")]
    QueueFull { link: String },

    /// The reconnect loop gave up after exhausting its attempt budget.
    #[error("Reconnect attempts exhausted for link '{link}' after {attempts} tries")]
    AttemptsExhausted { link: String, attempts: u32 },

    /// The reconnect loop was interrupted by shutdown.
    #[error("Operation on link '{link}' cancelled")]
    Cancelled { link: String },
}

impl LinkError {
    /// Returns `true` for errors caused by shutdown rather than a fault.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_string()
    }
}
