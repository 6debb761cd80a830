//! Clock abstraction shared by every time-dependent component.
//!
//! The breaker, the reconnect strategy and the health monitor never call
//! `Instant::now()` directly. They read an injected [`Clock`], so tests can
//! drive recovery timeouts and slow-start ramps with a [`MockClock`] instead
//! of sleeping.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

/// Source of monotonic and wall-clock time.
pub trait Clock: fmt::Debug + Send + Sync + 'static {
    /// Monotonic instant, used for every interval computation.
    fn now(&self) -> Instant;

    /// Wall-clock time, used only for timestamps shown to operators.
    fn system_time(&self) -> SystemTime;

    /// Wall-clock time as a UTC timestamp.
    fn wall_time(&self) -> DateTime<Utc> {
        DateTime::<Utc>::from(self.system_time())
    }
}

/// Real clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn system_time(&self) -> SystemTime {
        (**self).system_time()
    }
}

/// Shared, type-erased clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Returns a shared handle to the system clock.
pub fn system_clock() -> SharedClock {
    Arc::new(SystemClock)
}

/// Manually advanced clock for deterministic tests.
///
/// Clones share the same offset, so a clock handed to a component can be
/// advanced from the test body.
#[derive(Debug, Clone)]
pub struct MockClock {
    origin: Instant,
    wall_origin: SystemTime,
    offset: Arc<Mutex<Duration>>,
}

impl MockClock {
    /// Creates a clock frozen at the current instant.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            wall_origin: SystemTime::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }

    /// Moves the clock forward by whole seconds.
    pub fn advance_secs(&self, secs: u64) {
        self.advance(Duration::from_secs(secs));
    }

    /// Total time advanced since creation.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock()
    }
}

impl Default for MockClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MockClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.wall_origin + self.elapsed()
    }
}
