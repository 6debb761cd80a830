//! Reconnect scheduling with exponential backoff, jitter and slow start.
//!
//! A [`ReconnectStrategy`] answers two questions for a link:
//!
//! - while the link is down: how long to wait before the next connect attempt
//!   ([`ReconnectStrategy::get_delay`], [`ReconnectStrategy::wait`]);
//! - right after it came back: how hard the transmit path may push
//!   ([`ReconnectStrategy::throughput_factor`],
//!   [`ReconnectStrategy::inter_packet_delay`]).
//!
//! The slow-start window only opens on a real recovery, i.e. a success that
//! follows at least one failed attempt. A first-ever connect runs at full rate.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::{ConfigError, ConfigResult};
use crate::serde_utils::duration_millis;
use crate::time::{system_clock, SharedClock};

/// Throughput factor at the very start of a slow-start window.
pub const SLOW_START_FLOOR: f64 = 0.1;

/// Backoff and slow-start parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Delay before the first retry.
    #[serde(with = "duration_millis")]
    pub initial_delay: Duration,
    /// Upper bound of the un-jittered delay.
    #[serde(with = "duration_millis")]
    pub max_delay: Duration,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Jitter as a fraction of the base delay, applied as `±jitter * base`.
    pub jitter: f64,
    /// Attempts allowed before [`ReconnectStrategy::should_retry`] gives up.
    pub max_attempts: u32,
    /// Length of the post-recovery throughput ramp. Zero disables it.
    #[serde(with = "duration_millis")]
    pub slow_start_duration: Duration,
    /// Inter-packet delay at the start of the ramp.
    #[serde(with = "duration_millis")]
    pub max_pacing_delay: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::mesh_radio()
    }
}

impl ReconnectConfig {
    /// Tuned for a serial/TCP radio: slow to come back, low airtime budget.
    pub fn mesh_radio() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.15,
            max_attempts: 10,
            slow_start_duration: Duration::from_secs(30),
            max_pacing_delay: Duration::from_secs(2),
        }
    }

    /// Tuned for the overlay transport: quick to reconnect, higher bandwidth.
    pub fn overlay_network() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 1.5,
            jitter: 0.10,
            max_attempts: 20,
            slow_start_duration: Duration::from_secs(15),
            max_pacing_delay: Duration::from_millis(500),
        }
    }

    pub fn builder() -> ReconnectConfigBuilder {
        ReconnectConfigBuilder::default()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.initial_delay.is_zero() {
            return Err(ConfigError::invalid("initial_delay", "must be greater than 0"));
        }
        if self.max_delay < self.initial_delay {
            return Err(ConfigError::invalid("max_delay", "must be >= initial_delay"));
        }
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(ConfigError::invalid("multiplier", "must be a finite value >= 1.0"));
        }
        if !(0.0..1.0).contains(&self.jitter) {
            return Err(ConfigError::invalid("jitter", "must be in [0.0, 1.0)"));
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::invalid("max_attempts", "must be greater than 0"));
        }
        Ok(())
    }
}

/// Fluent builder for [`ReconnectConfig`], seeded with the mesh-radio preset.
#[derive(Debug, Default)]
pub struct ReconnectConfigBuilder {
    config: ReconnectConfig,
}

impl ReconnectConfigBuilder {
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.config.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.config.multiplier = multiplier;
        self
    }

    pub fn jitter(mut self, jitter: f64) -> Self {
        self.config.jitter = jitter;
        self
    }

    pub fn no_jitter(self) -> Self {
        self.jitter(0.0)
    }

    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.config.max_attempts = attempts;
        self
    }

    pub fn slow_start(mut self, duration: Duration, max_pacing_delay: Duration) -> Self {
        self.config.slow_start_duration = duration;
        self.config.max_pacing_delay = max_pacing_delay;
        self
    }

    pub fn build(self) -> ConfigResult<ReconnectConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Dashboard view of a strategy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconnectSnapshot {
    pub attempts: u32,
    pub max_attempts: u32,
    pub throughput_factor: f64,
    #[serde(with = "duration_millis")]
    pub inter_packet_delay: Duration,
    pub in_slow_start: bool,
}

#[derive(Debug, Default)]
struct ReconnectState {
    attempts: u32,
    recovery_start: Option<Instant>,
}

/// Per-link reconnect scheduler.
///
/// Shared between the control loop (which records connect outcomes) and the
/// transmit queue (which reads the pacing delay), so every method takes
/// `&self`.
pub struct ReconnectStrategy {
    name: String,
    config: ReconnectConfig,
    state: Mutex<ReconnectState>,
    clock: SharedClock,
}

impl fmt::Debug for ReconnectStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReconnectStrategy")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("attempts", &self.attempts())
            .finish()
    }
}

impl ReconnectStrategy {
    pub fn new(name: impl Into<String>, config: ReconnectConfig) -> ConfigResult<Self> {
        Self::with_clock(name, config, system_clock())
    }

    pub fn with_clock(
        name: impl Into<String>,
        config: ReconnectConfig,
        clock: SharedClock,
    ) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self { name: name.into(), config, state: Mutex::new(ReconnectState::default()), clock })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    /// Failed attempts since the last success or reset.
    pub fn attempts(&self) -> u32 {
        self.state.lock().attempts
    }

    /// Un-jittered delay for `attempt`: `min(initial * multiplier^attempt, max)`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.config.initial_delay.as_secs_f64() * self.config.multiplier.powi(exponent);
        let capped = secs.min(self.config.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.config.max_delay)
    }

    /// Jittered delay for `attempt`, or for the current attempt count when
    /// `None`. Never exceeds `max_delay * (1 + jitter)`.
    pub fn get_delay(&self, attempt: Option<u32>) -> Duration {
        let attempt = attempt.unwrap_or_else(|| self.attempts());
        let base = self.base_delay(attempt).as_secs_f64();
        let range = base * self.config.jitter;
        let offset = if range > 0.0 { rand::thread_rng().gen_range(-range..=range) } else { 0.0 };
        Duration::try_from_secs_f64((base + offset).max(0.0)).unwrap_or(Duration::ZERO)
    }

    pub fn should_retry(&self) -> bool {
        self.attempts() < self.config.max_attempts
    }

    pub fn record_failure(&self) {
        let mut state = self.state.lock();
        state.attempts = state.attempts.saturating_add(1);
        debug!(
            link = %self.name,
            attempts = state.attempts,
            max_attempts = self.config.max_attempts,
            "Reconnect attempt failed"
        );
    }

    /// Resets the attempt counter. Opens a slow-start window when the success
    /// ends an outage.
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        let recovered_after = state.attempts;
        state.attempts = 0;
        if recovered_after > 0 && !self.config.slow_start_duration.is_zero() {
            state.recovery_start = Some(self.clock.now());
            info!(
                link = %self.name,
                failed_attempts = recovered_after,
                slow_start_ms = self.config.slow_start_duration.as_millis() as u64,
                "Link recovered, slow start engaged"
            );
        }
    }

    /// Clears the attempt counter without opening a slow-start window.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.attempts = 0;
        state.recovery_start = None;
    }

    /// Fraction of full throughput allowed right now, in `[0.1, 1.0]`.
    pub fn throughput_factor(&self) -> f64 {
        let recovery_start = self.state.lock().recovery_start;
        let Some(start) = recovery_start else {
            return 1.0;
        };
        let window = self.config.slow_start_duration;
        let elapsed = self.clock.now().saturating_duration_since(start);
        if window.is_zero() || elapsed >= window {
            return 1.0;
        }
        let progress = elapsed.as_secs_f64() / window.as_secs_f64();
        (SLOW_START_FLOOR + (1.0 - SLOW_START_FLOOR) * progress).clamp(SLOW_START_FLOOR, 1.0)
    }

    /// Pacing delay for the transmit path: `(1 - factor) * max_pacing_delay`.
    pub fn inter_packet_delay(&self) -> Duration {
        let factor = self.throughput_factor();
        self.config.max_pacing_delay.mul_f64((1.0 - factor).max(0.0))
    }

    /// Whether a slow-start window is currently throttling the link.
    pub fn in_slow_start(&self) -> bool {
        self.throughput_factor() < 1.0
    }

    /// Returns a pacing function for [`crate::queue::TxQueue`] that reads
    /// this strategy's current inter-packet delay.
    pub fn pacing(self: &Arc<Self>) -> impl Fn() -> Duration + Send + Sync + 'static {
        let strategy = Arc::clone(self);
        move || strategy.inter_packet_delay()
    }

    /// Sleeps for `timeout`, or for [`get_delay`](Self::get_delay) when
    /// `None`. Returns `false` as soon as `cancel` fires, `true` if the full
    /// delay elapsed.
    pub async fn wait(&self, cancel: &CancellationToken, timeout: Option<Duration>) -> bool {
        if cancel.is_cancelled() {
            return false;
        }
        let delay = timeout.unwrap_or_else(|| self.get_delay(None));
        debug!(link = %self.name, delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    pub fn snapshot(&self) -> ReconnectSnapshot {
        let factor = self.throughput_factor();
        ReconnectSnapshot {
            attempts: self.attempts(),
            max_attempts: self.config.max_attempts,
            throughput_factor: factor,
            inter_packet_delay: self.config.max_pacing_delay.mul_f64((1.0 - factor).max(0.0)),
            in_slow_start: factor < 1.0,
        }
    }
}
