//! Active health probing with hysteresis.
//!
//! The probe runs every registered [`HealthCheck`] once per interval, one at
//! a time, and feeds each result through a per-service state machine:
//!
//! ```text
//! UNKNOWN ──(passes)──► HEALTHY ──(fails)──► UNHEALTHY
//!                          ▲                   │    ▲
//!                          │                1 pass  1 fail
//!                          │                   ▼    │
//!                          └─────(passes)── RECOVERING
//! ```
//!
//! A misbehaving check (error, panic or timeout) becomes a failing result.
//! The loop body itself is guarded too: an unexpected failure is logged,
//! counted and followed by a short back-off instead of ending the probe.
//! Check and callback panics are already caught per check, so this guard is
//! a last resort.
//!
//! # Lifecycle
//!
//! [`ActiveHealthProbe::start`] spawns the loop on the current Tokio runtime
//! and [`ActiveHealthProbe::stop`] cancels it and waits, bounded by a
//! timeout, for the task to exit. Both are idempotent.

pub mod checks;
pub mod state;

use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub use checks::{check_fn, BreakerCheck, FnCheck, HealthCheck};
#[cfg(feature = "builtin-checks")]
pub use checks::{SystemdServiceCheck, TcpPortCheck};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
pub use state::{HealthResult, HealthState, LastResult, ServiceHealthState, ServiceStatus};
use state::Hysteresis;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{panic_message, ConfigError, ConfigResult, LinkError, LinkResult};
use crate::serde_utils::duration_millis;
use crate::time::{system_clock, SharedClock};

const WORKER_NAME: &str = "health-probe";

/// Upper bound on the back-off after a failed loop iteration.
const LOOP_ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Probe timing and hysteresis thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Pause between probe cycles.
    #[serde(with = "duration_millis")]
    pub interval: Duration,
    /// Consecutive failures that mark a service unhealthy.
    pub fails: u32,
    /// Consecutive passes that mark a service healthy.
    pub passes: u32,
    /// Budget for a single check; an expired check fails with reason `timeout`.
    #[serde(with = "duration_millis")]
    pub check_timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            fails: 3,
            passes: 2,
            check_timeout: Duration::from_secs(10),
        }
    }
}

impl ProbeConfig {
    pub fn builder() -> ProbeConfigBuilder {
        ProbeConfigBuilder::default()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.interval.is_zero() {
            return Err(ConfigError::invalid("interval", "must be greater than 0"));
        }
        if self.fails == 0 {
            return Err(ConfigError::invalid("fails", "must be greater than 0"));
        }
        if self.passes == 0 {
            return Err(ConfigError::invalid("passes", "must be greater than 0"));
        }
        if self.check_timeout.is_zero() {
            return Err(ConfigError::invalid("check_timeout", "must be greater than 0"));
        }
        Ok(())
    }

    fn hysteresis(&self) -> Hysteresis {
        Hysteresis { passes: self.passes, fails: self.fails }
    }
}

#[derive(Debug, Default)]
pub struct ProbeConfigBuilder {
    config: ProbeConfig,
}

impl ProbeConfigBuilder {
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    pub fn fails(mut self, fails: u32) -> Self {
        self.config.fails = fails;
        self
    }

    pub fn passes(mut self, passes: u32) -> Self {
        self.config.passes = passes;
        self
    }

    pub fn check_timeout(mut self, timeout: Duration) -> Self {
        self.config.check_timeout = timeout;
        self
    }

    pub fn build(self) -> ConfigResult<ProbeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Which transitions a callback listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbeEvent {
    /// Any state change.
    StateChange,
    /// Transitions into `HEALTHY`.
    Healthy,
    /// Transitions into `UNHEALTHY`.
    Unhealthy,
}

impl ProbeEvent {
    fn matches(self, state: HealthState) -> bool {
        match self {
            ProbeEvent::StateChange => true,
            ProbeEvent::Healthy => state == HealthState::Healthy,
            ProbeEvent::Unhealthy => state == HealthState::Unhealthy,
        }
    }
}

/// Callback invoked as `callback(service_name, new_state)`.
pub type ProbeCallback = Arc<dyn Fn(&str, HealthState) + Send + Sync>;

struct Service {
    check: Arc<dyn HealthCheck>,
    health: ServiceHealthState,
}

struct ProbeShared {
    config: ProbeConfig,
    services: Mutex<BTreeMap<String, Service>>,
    callbacks: Mutex<Vec<(ProbeEvent, ProbeCallback)>>,
    loop_errors: AtomicU64,
    clock: SharedClock,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Background prober for a set of named services.
pub struct ActiveHealthProbe {
    shared: Arc<ProbeShared>,
    worker: Mutex<Option<Worker>>,
}

impl fmt::Debug for ActiveHealthProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActiveHealthProbe")
            .field("config", &self.shared.config)
            .field("services", &self.services())
            .field("running", &self.is_running())
            .finish()
    }
}

impl ActiveHealthProbe {
    pub fn new(config: ProbeConfig) -> ConfigResult<Self> {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: ProbeConfig, clock: SharedClock) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(ProbeShared {
                config,
                services: Mutex::new(BTreeMap::new()),
                callbacks: Mutex::new(Vec::new()),
                loop_errors: AtomicU64::new(0),
                clock,
            }),
            worker: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.shared.config
    }

    /// Registers (or replaces) the check for `name`. The service starts, or
    /// restarts, in `UNKNOWN` with zeroed counters.
    pub fn register_check(&self, name: impl Into<String>, check: impl HealthCheck) {
        let name = name.into();
        debug!(service = %name, "Registered health check");
        let health = ServiceHealthState::new(name.clone());
        self.shared.services.lock().insert(name, Service { check: Arc::new(check), health });
    }

    pub fn register_callback<F>(&self, event: ProbeEvent, callback: F)
    where
        F: Fn(&str, HealthState) + Send + Sync + 'static,
    {
        self.shared.callbacks.lock().push((event, Arc::new(callback)));
    }

    /// Runs the check for `name` immediately and applies the result.
    pub async fn check_now(&self, name: &str) -> HealthResult {
        self.shared.run_check(name).await
    }

    /// Strictly `state == HEALTHY`; unknown services read as unhealthy.
    pub fn is_healthy(&self, name: &str) -> bool {
        self.state(name) == Some(HealthState::Healthy)
    }

    pub fn state(&self, name: &str) -> Option<HealthState> {
        self.shared.services.lock().get(name).map(|s| s.health.state)
    }

    pub fn get_status(&self, name: &str) -> Option<ServiceStatus> {
        self.shared.services.lock().get(name).map(|s| s.health.status())
    }

    pub fn get_all_status(&self) -> BTreeMap<String, ServiceStatus> {
        self.shared
            .services
            .lock()
            .iter()
            .map(|(name, s)| (name.clone(), s.health.status()))
            .collect()
    }

    pub fn services(&self) -> Vec<String> {
        self.shared.services.lock().keys().cloned().collect()
    }

    /// Loop iterations that failed unexpectedly since creation.
    pub fn loop_errors(&self) -> u64 {
        self.shared.loop_errors.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(|w| !w.handle.is_finished())
    }

    /// Spawns the probe loop. A no-op if it is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        let mut worker = self.worker.lock();
        if worker.as_ref().is_some_and(|w| !w.handle.is_finished()) {
            return;
        }

        let config = &self.shared.config;
        info!(
            interval_ms = config.interval.as_millis() as u64,
            fails = config.fails,
            passes = config.passes,
            "Starting active health probe"
        );

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(probe_worker(Arc::clone(&self.shared), cancel.clone()));
        *worker = Some(Worker { cancel, handle });
    }

    /// Signals the loop to stop and waits up to `timeout` for it to exit.
    ///
    /// Returns [`LinkError::ShutdownTimeout`] if the task is still running
    /// when the timeout expires; it has been cancelled and exits at its next
    /// await point. Until then it stays tracked, so `start` does not spawn a
    /// second loop.
    pub async fn stop(&self, timeout: Duration) -> LinkResult<()> {
        let Some(mut worker) = self.worker.lock().take() else {
            return Ok(());
        };
        worker.cancel.cancel();

        match tokio::time::timeout(timeout, &mut worker.handle).await {
            Ok(Ok(())) => {
                info!("Active health probe stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(LinkError::WorkerPanicked { worker: WORKER_NAME, message: e.to_string() }),
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Health probe did not stop in time");
                let mut slot = self.worker.lock();
                if slot.is_none() {
                    *slot = Some(worker);
                }
                Err(LinkError::ShutdownTimeout { worker: WORKER_NAME, timeout })
            }
        }
    }
}

impl Drop for ActiveHealthProbe {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.cancel.cancel();
        }
    }
}

impl ProbeShared {
    async fn run_check(&self, name: &str) -> HealthResult {
        let check = self.services.lock().get(name).map(|s| Arc::clone(&s.check));
        let Some(check) = check else {
            return HealthResult::fail("no_check_registered");
        };

        let started = self.clock.now();
        let outcome = tokio::time::timeout(
            self.config.check_timeout,
            AssertUnwindSafe(check.check()).catch_unwind(),
        )
        .await;
        let latency = self.clock.now().saturating_duration_since(started);

        let result = match outcome {
            Ok(Ok(Ok(result))) => result,
            Ok(Ok(Err(e))) => HealthResult::fail(format!("check_exception: {e}")),
            Ok(Err(panic)) => {
                HealthResult::fail(format!("check_exception: {}", panic_message(panic.as_ref())))
            }
            Err(_) => HealthResult::fail("timeout"),
        }
        .stamped(latency, self.clock.wall_time());

        let transition = {
            let mut services = self.services.lock();
            services.get_mut(name).and_then(|s| {
                let previous = s.health.apply(result.clone(), self.config.hysteresis())?;
                Some((previous, s.health.state))
            })
        };

        if let Some((previous, current)) = transition {
            match current {
                HealthState::Healthy => info!(service = name, from = %previous, "Service is now HEALTHY"),
                HealthState::Unhealthy => {
                    warn!(service = name, from = %previous, reason = %result.reason, "Service is now UNHEALTHY")
                }
                _ => debug!(service = name, from = %previous, to = %current, "Service health changed"),
            }
            self.fire_callbacks(name, current);
        }

        result
    }

    fn fire_callbacks(&self, name: &str, state: HealthState) {
        let callbacks: Vec<ProbeCallback> = self
            .callbacks
            .lock()
            .iter()
            .filter(|(event, _)| event.matches(state))
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| callback(name, state))) {
                debug!(service = name, error = %panic_message(panic.as_ref()), "Health callback failed");
            }
        }
    }

    async fn run_cycle(&self, cancel: &CancellationToken) {
        let names: Vec<String> = self.services.lock().keys().cloned().collect();
        for name in names {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = self.run_check(&name) => {}
            }
        }
    }
}

/// Runs one cycle and returns how long to sleep before the next.
///
/// A panic escaping the cycle is counted in `loop_errors` and shortens the
/// pause to at most [`LOOP_ERROR_BACKOFF`].
async fn guarded_cycle<F>(shared: &ProbeShared, cycle: F) -> Duration
where
    F: Future<Output = ()>,
{
    let interval = shared.config.interval;
    match AssertUnwindSafe(cycle).catch_unwind().await {
        Ok(()) => interval,
        Err(panic) => {
            let errors = shared.loop_errors.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                loop_errors = errors,
                error = %panic_message(panic.as_ref()),
                "Health probe loop error"
            );
            interval.min(LOOP_ERROR_BACKOFF)
        }
    }
}

/// Probe loop: one cycle over all services, then sleep for the interval.
#[instrument(name = "health_probe", skip_all)]
async fn probe_worker(shared: Arc<ProbeShared>, cancel: CancellationToken) {
    while !cancel.is_cancelled() {
        let pause = guarded_cycle(&shared, shared.run_cycle(&cancel)).await;

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }

    debug!("Health probe worker exiting");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::error::BoxError;

    fn explode() -> Result<HealthResult, BoxError> {
        panic!("driver crashed")
    }

    async fn broken_cycle() {
        panic!("cycle exploded")
    }

    fn probe() -> ActiveHealthProbe {
        ActiveHealthProbe::new(ProbeConfig::default()).expect("valid config")
    }

    fn scripted(results: Vec<bool>) -> impl HealthCheck {
        let results = Arc::new(results);
        let index = Arc::new(AtomicUsize::new(0));
        check_fn(move || {
            let results = Arc::clone(&results);
            let i = index.fetch_add(1, Ordering::SeqCst);
            async move {
                let ok = results.get(i).copied().unwrap_or(false);
                Ok::<_, BoxError>(HealthResult::new(ok, if ok { "ok" } else { "down" }))
            }
        })
    }

    #[test]
    fn test_config_validation() {
        assert!(ProbeConfig::default().validate().is_ok());
        assert!(ProbeConfig::builder().interval(Duration::ZERO).build().is_err());
        assert!(ProbeConfig::builder().fails(0).build().is_err());
        assert!(ProbeConfig::builder().passes(0).build().is_err());
        assert!(ProbeConfig::builder().check_timeout(Duration::ZERO).build().is_err());
    }

    #[tokio::test]
    async fn test_unregistered_service() {
        let probe = probe();
        let result = probe.check_now("ghost").await;
        assert!(!result.healthy);
        assert_eq!(result.reason, "no_check_registered");
        assert!(!probe.is_healthy("ghost"));
        assert!(probe.get_status("ghost").is_none());
    }

    #[tokio::test]
    async fn test_hysteresis_through_check_now() {
        let probe = probe();
        probe.register_check("mesh", scripted(vec![true, true, false, false, false, true, true]));

        probe.check_now("mesh").await;
        assert_eq!(probe.state("mesh"), Some(HealthState::Unknown));
        probe.check_now("mesh").await;
        assert!(probe.is_healthy("mesh"));

        for _ in 0..3 {
            probe.check_now("mesh").await;
        }
        assert_eq!(probe.state("mesh"), Some(HealthState::Unhealthy));

        probe.check_now("mesh").await;
        assert_eq!(probe.state("mesh"), Some(HealthState::Recovering));
        assert!(!probe.is_healthy("mesh"));

        probe.check_now("mesh").await;
        assert!(probe.is_healthy("mesh"));
    }

    #[tokio::test]
    async fn test_check_error_becomes_failing_result() {
        let probe = probe();
        probe.register_check(
            "overlay",
            check_fn(|| async { Err::<HealthResult, BoxError>("connection refused".into()) }),
        );

        let result = probe.check_now("overlay").await;
        assert!(!result.healthy);
        assert_eq!(result.reason, "check_exception: connection refused");
    }

    #[tokio::test]
    async fn test_check_panic_is_contained() {
        let probe = probe();
        probe.register_check(
            "overlay",
            check_fn(|| async { explode() }),
        );

        let result = probe.check_now("overlay").await;
        assert!(!result.healthy);
        assert_eq!(result.reason, "check_exception: panicked: driver crashed");
        assert_eq!(probe.get_status("overlay").expect("registered").total_checks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_check_times_out() {
        let config = ProbeConfig::builder().check_timeout(Duration::from_secs(1)).build().expect("valid");
        let probe = ActiveHealthProbe::new(config).expect("valid");
        probe.register_check(
            "mesh",
            check_fn(|| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, BoxError>(HealthResult::pass("late"))
            }),
        );

        let result = probe.check_now("mesh").await;
        assert!(!result.healthy);
        assert_eq!(result.reason, "timeout");
    }

    #[tokio::test]
    async fn test_callbacks_fire_on_transitions_only() {
        let probe = probe();
        let changes = Arc::new(Mutex::new(Vec::new()));
        let healthy = Arc::new(AtomicUsize::new(0));

        let sink = Arc::clone(&changes);
        probe.register_callback(ProbeEvent::StateChange, move |name, state| {
            sink.lock().push((name.to_string(), state));
        });
        let counter = Arc::clone(&healthy);
        probe.register_callback(ProbeEvent::Healthy, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        probe.register_callback(ProbeEvent::Unhealthy, |_, _| panic!("callback bug"));

        probe.register_check("mesh", scripted(vec![true, true, true, false, false, false]));
        for _ in 0..6 {
            probe.check_now("mesh").await;
        }

        assert_eq!(
            *changes.lock(),
            vec![
                ("mesh".to_string(), HealthState::Healthy),
                ("mesh".to_string(), HealthState::Unhealthy),
            ]
        );
        assert_eq!(healthy.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_re_register_resets_state() {
        let probe = probe();
        probe.register_check("mesh", scripted(vec![true, true]));
        probe.check_now("mesh").await;
        probe.check_now("mesh").await;
        assert!(probe.is_healthy("mesh"));

        probe.register_check("mesh", scripted(vec![true]));
        assert_eq!(probe.state("mesh"), Some(HealthState::Unknown));
        assert_eq!(probe.get_status("mesh").expect("registered").total_checks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_runs_every_interval_and_stops() {
        let config = ProbeConfig::builder().interval(Duration::from_secs(10)).build().expect("valid");
        let probe = ActiveHealthProbe::new(config).expect("valid");
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        probe.register_check(
            "mesh",
            check_fn(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, BoxError>(HealthResult::pass("ok")) }
            }),
        );

        probe.start();
        probe.start();
        assert!(probe.is_running());

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(probe.is_healthy("mesh"));

        probe.stop(Duration::from_secs(1)).await.expect("stops");
        assert!(!probe.is_running());
        probe.stop(Duration::from_secs(1)).await.expect("second stop is a no-op");
    }

    #[tokio::test]
    async fn test_escaped_cycle_panic_is_counted_and_backs_off() {
        let probe = probe();
        assert_eq!(probe.loop_errors(), 0);

        let pause = guarded_cycle(&probe.shared, broken_cycle()).await;
        assert_eq!(pause, LOOP_ERROR_BACKOFF);
        assert_eq!(probe.loop_errors(), 1);

        let pause = guarded_cycle(&probe.shared, async {}).await;
        assert_eq!(pause, Duration::from_secs(30));
        assert_eq!(probe.loop_errors(), 1);
    }

    #[tokio::test]
    async fn test_back_off_never_exceeds_interval() {
        let config = ProbeConfig::builder().interval(Duration::from_secs(2)).build().expect("valid");
        let probe = ActiveHealthProbe::new(config).expect("valid");

        let pause = guarded_cycle(&probe.shared, broken_cycle()).await;
        assert_eq!(pause, Duration::from_secs(2));
        assert_eq!(probe.loop_errors(), 1);
    }
}
