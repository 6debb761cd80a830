//! Per-link circuit breaker.
//!
//! The breaker stops the transmit path from hammering a dead link. It counts
//! consecutive send failures and, once the threshold is reached, rejects
//! requests until `recovery_timeout` has elapsed. After that a probe request
//! is let through (`HALF_OPEN`); its outcome either closes the breaker or
//! re-opens it immediately.
//!
//! There is no background timer. `OPEN` turns into `HALF_OPEN` the first time
//! the state is read after the timeout elapsed, so the state is a pure
//! function of the clock and the stored fields.
//!
//! ```text
//!            failures >= threshold
//!  ┌────────┐ ─────────────────────► ┌──────┐
//!  │ CLOSED │                        │ OPEN │
//!  └────────┘ ◄───┐                  └──┬───┘
//!       ▲         │ success             │ recovery_timeout elapsed
//!       │         │                     ▼
//!       │      ┌──┴────────┐  failure  ┌───────────┐
//!       └──────┤ HALF_OPEN ├──────────►│ (re-open) │
//!     success  └───────────┘           └───────────┘
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};
use crate::serde_utils::duration_millis;
use crate::time::{system_clock, SharedClock};

/// Breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow through.
    Closed,
    /// Too many failures; requests are rejected.
    Open,
    /// Recovery probe; requests are allowed to test the link.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Thresholds for a [`CircuitBreaker`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that trip the breaker while closed.
    pub failure_threshold: u32,
    /// How long the breaker stays open before allowing a probe.
    #[serde(with = "duration_millis")]
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self { failure_threshold: 5, recovery_timeout: Duration::from_secs(30) }
    }
}

impl CircuitBreakerConfig {
    /// Starts a builder seeded with the defaults.
    pub fn builder() -> CircuitBreakerConfigBuilder {
        CircuitBreakerConfigBuilder::default()
    }

    /// Checks that the thresholds can ever trip and recover.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold", "must be greater than 0"));
        }
        if self.recovery_timeout.is_zero() {
            return Err(ConfigError::invalid("recovery_timeout", "must be greater than 0"));
        }
        Ok(())
    }
}

/// Fluent builder for [`CircuitBreakerConfig`].
#[derive(Debug, Default)]
pub struct CircuitBreakerConfigBuilder {
    config: CircuitBreakerConfig,
}

impl CircuitBreakerConfigBuilder {
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.config.recovery_timeout = timeout;
        self
    }

    pub fn build(self) -> ConfigResult<CircuitBreakerConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Point-in-time view of a breaker, suitable for dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failures: u32,
    pub failure_threshold: u32,
    #[serde(with = "duration_millis")]
    pub recovery_timeout: Duration,
    /// Time left before an open breaker admits a probe; zero otherwise.
    #[serde(with = "duration_millis")]
    pub retry_in: Duration,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failures: u32,
    opened_at: Option<Instant>,
}

/// Thread-safe circuit breaker guarding one link.
///
/// Share it behind an `Arc`; every method takes `&self` and runs a short
/// critical section under a single mutex.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    clock: SharedClock,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("state", &self.state())
            .field("failures", &self.failures())
            .finish()
    }
}

impl CircuitBreaker {
    /// Creates a breaker on the system clock.
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> ConfigResult<Self> {
        Self::with_clock(name, config, system_clock())
    }

    /// Creates a breaker on a caller-supplied clock.
    pub fn with_clock(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: SharedClock,
    ) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failures: 0,
                opened_at: None,
            }),
            clock,
        })
    }

    /// Link name used in log events.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state. An open breaker whose recovery timeout has elapsed is
    /// reported (and stored) as `HALF_OPEN`.
    pub fn state(&self) -> CircuitState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner)
    }

    /// Whether a send should be attempted right now.
    pub fn allow_request(&self) -> bool {
        matches!(self.state(), CircuitState::Closed | CircuitState::HalfOpen)
    }

    /// Records a successful send and closes the breaker.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        let previous = inner.state;
        inner.failures = 0;
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        if previous != CircuitState::Closed {
            info!(link = %self.name, from = %previous, "Circuit breaker closed");
        }
    }

    /// Records a failed send; may trip the breaker open.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        let current = self.refresh(&mut inner);
        inner.failures = inner.failures.saturating_add(1);

        match current {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(self.clock.now());
                warn!(link = %self.name, "Circuit breaker re-opened after failed probe");
            }
            CircuitState::Closed if inner.failures >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(self.clock.now());
                warn!(
                    link = %self.name,
                    failures = inner.failures,
                    recovery_timeout_ms = self.config.recovery_timeout.as_millis() as u64,
                    "Circuit breaker opened"
                );
            }
            CircuitState::Closed => {
                debug!(
                    link = %self.name,
                    failures = inner.failures,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker recorded failure"
                );
            }
            CircuitState::Open => {}
        }
    }

    /// Forces the breaker closed and clears its counters, e.g. after a
    /// manual reconnect.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.opened_at = None;
        info!(link = %self.name, "Circuit breaker reset");
    }

    /// Failures counted since the last success or reset.
    pub fn failures(&self) -> u32 {
        self.inner.lock().failures
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let mut inner = self.inner.lock();
        let state = self.refresh(&mut inner);
        let retry_in = match (state, inner.opened_at) {
            (CircuitState::Open, Some(opened_at)) => self
                .config
                .recovery_timeout
                .saturating_sub(self.clock.now().saturating_duration_since(opened_at)),
            _ => Duration::ZERO,
        };
        CircuitBreakerSnapshot {
            state,
            failures: inner.failures,
            failure_threshold: self.config.failure_threshold,
            recovery_timeout: self.config.recovery_timeout,
            retry_in,
        }
    }

    fn refresh(&self, inner: &mut BreakerInner) -> CircuitState {
        if inner.state == CircuitState::Open {
            let elapsed = inner
                .opened_at
                .map(|opened_at| self.clock.now().saturating_duration_since(opened_at))
                .unwrap_or(Duration::MAX);
            if elapsed >= self.config.recovery_timeout {
                inner.state = CircuitState::HalfOpen;
                debug!(link = %self.name, "Circuit breaker half-open, admitting probe");
            }
        }
        inner.state
    }
}
