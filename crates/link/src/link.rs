//! One link's reliability stack, wired together.
//!
//! A [`LinkGuard`] owns the circuit breaker, the reconnect strategy and the
//! transmit queue of a single link, and reports everything into the shared
//! [`BridgeHealthMonitor`]:
//!
//! ```text
//! submit(payload)
//!   └─ breaker.allow_request()? ──no──► LinkError::CircuitOpen
//!        └─ queue.enqueue() ──full──► LinkError::QueueFull
//!             └─ drain worker ── pacing from ReconnectStrategy
//!                  └─ ReportingSender ──► transport send
//!                       ├─ ok:  breaker.record_success, monitor.record_message_sent
//!                       └─ err: breaker.record_failure, monitor.record_message_failed,
//!                               monitor.record_error
//! ```
//!
//! [`LinkGuard::connect_with_backoff`] is the reconnect loop the control path
//! runs while the link is down.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{panic_message, BoxError, LinkError, LinkResult};
use crate::monitor::{BridgeHealthMonitor, ConnectionEventKind, Direction};
use crate::probe::BreakerCheck;
use crate::queue::{PacketSender, TxQueue, TxQueueConfig, TxQueueStats};
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerSnapshot, ReconnectConfig,
    ReconnectSnapshot, ReconnectStrategy,
};
use crate::time::SharedClock;

/// Per-link settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkGuardConfig {
    pub breaker: CircuitBreakerConfig,
    pub reconnect: ReconnectConfig,
    pub queue: TxQueueConfig,
    /// Direction of traffic sent over this link, used for message counters.
    pub outbound: Direction,
}

impl LinkGuardConfig {
    /// Radio mesh link; carries overlay-to-mesh traffic.
    pub fn mesh_radio() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            reconnect: ReconnectConfig::mesh_radio(),
            queue: TxQueueConfig::default(),
            outbound: Direction::OverlayToMesh,
        }
    }

    /// Overlay network link; carries mesh-to-overlay traffic.
    pub fn overlay_network() -> Self {
        Self {
            breaker: CircuitBreakerConfig::default(),
            reconnect: ReconnectConfig::overlay_network(),
            queue: TxQueueConfig::default(),
            outbound: Direction::MeshToOverlay,
        }
    }

    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_queue(mut self, queue: TxQueueConfig) -> Self {
        self.queue = queue;
        self
    }
}

/// [`PacketSender`] decorator that reports every outcome to the breaker and
/// the monitor before passing it on.
pub struct ReportingSender {
    link: String,
    direction: Direction,
    inner: Arc<dyn PacketSender>,
    breaker: Arc<CircuitBreaker>,
    monitor: Arc<BridgeHealthMonitor>,
}

impl ReportingSender {
    pub fn new(
        link: impl Into<String>,
        direction: Direction,
        inner: impl PacketSender,
        breaker: Arc<CircuitBreaker>,
        monitor: Arc<BridgeHealthMonitor>,
    ) -> Self {
        Self { link: link.into(), direction, inner: Arc::new(inner), breaker, monitor }
    }
}

#[async_trait]
impl PacketSender for ReportingSender {
    async fn send(&self, payload: Vec<u8>) -> Result<(), BoxError> {
        let outcome = match AssertUnwindSafe(self.inner.send(payload)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(panic) => Err(panic_message(panic.as_ref()).into()),
        };

        match outcome {
            Ok(()) => {
                self.breaker.record_success();
                self.monitor.record_message_sent(self.direction);
                Ok(())
            }
            Err(e) => {
                self.breaker.record_failure();
                self.monitor.record_message_failed(self.direction, false);
                self.monitor.record_error(&self.link, &*e);
                Err(e)
            }
        }
    }
}

/// Dashboard view of one link.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LinkSnapshot {
    pub name: String,
    pub breaker: CircuitBreakerSnapshot,
    pub reconnect: ReconnectSnapshot,
    pub queue: TxQueueStats,
}

/// Breaker, reconnect strategy and transmit queue of one link.
#[derive(Debug)]
pub struct LinkGuard {
    name: String,
    breaker: Arc<CircuitBreaker>,
    strategy: Arc<ReconnectStrategy>,
    queue: TxQueue,
    monitor: Arc<BridgeHealthMonitor>,
}

impl LinkGuard {
    pub fn new(
        name: impl Into<String>,
        config: LinkGuardConfig,
        sender: impl PacketSender,
        monitor: Arc<BridgeHealthMonitor>,
        clock: SharedClock,
    ) -> LinkResult<Self> {
        let name = name.into();
        let breaker =
            Arc::new(CircuitBreaker::with_clock(name.clone(), config.breaker, Arc::clone(&clock))?);
        let strategy =
            Arc::new(ReconnectStrategy::with_clock(name.clone(), config.reconnect, clock)?);
        let reporting = ReportingSender::new(
            name.clone(),
            config.outbound,
            sender,
            Arc::clone(&breaker),
            Arc::clone(&monitor),
        );
        let queue = TxQueue::new(name.clone(), config.queue, reporting)?.with_pacing(strategy.pacing());

        Ok(Self { name, breaker, strategy, queue, monitor })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn strategy(&self) -> &Arc<ReconnectStrategy> {
        &self.strategy
    }

    pub fn queue(&self) -> &TxQueue {
        &self.queue
    }

    pub fn monitor(&self) -> &Arc<BridgeHealthMonitor> {
        &self.monitor
    }

    /// Health check that reads this link's breaker.
    pub fn health_check(&self) -> BreakerCheck {
        BreakerCheck::new(Arc::clone(&self.breaker))
    }

    /// Gates `payload` on the breaker and queues it for the drain worker.
    pub fn submit(&self, payload: Vec<u8>) -> LinkResult<()> {
        if !self.breaker.allow_request() {
            return Err(LinkError::CircuitOpen { link: self.name.clone() });
        }
        if !self.queue.enqueue(payload) {
            return Err(LinkError::QueueFull { link: self.name.clone() });
        }
        Ok(())
    }

    /// Records that the transport reported the link down.
    pub fn mark_disconnected(&self, detail: impl Into<String>) {
        self.monitor.record_connection_event(&self.name, ConnectionEventKind::Disconnected, detail);
    }

    /// Runs `connect` until it succeeds, the attempt budget is spent or
    /// `cancel` fires.
    ///
    /// Every failure is classified and recorded as a `retry` event, then the
    /// loop waits for the backoff delay. On success the attempt counter is
    /// cleared (opening a slow-start window after an outage), the breaker is
    /// reset and a `connected` event is recorded.
    pub async fn connect_with_backoff<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        mut connect: F,
    ) -> LinkResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, BoxError>>,
    {
        loop {
            let attempt = self.strategy.attempts() + 1;
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(LinkError::Cancelled { link: self.name.clone() }),
                outcome = connect() => outcome,
            };

            match outcome {
                Ok(connection) => {
                    self.strategy.record_success();
                    self.breaker.reset();
                    self.monitor.record_connection_event(
                        &self.name,
                        ConnectionEventKind::Connected,
                        format!("attempt {attempt}"),
                    );
                    info!(link = %self.name, attempt, "Link connected");
                    return Ok(connection);
                }
                Err(e) => {
                    let category = self.monitor.record_error(&self.name, &*e);
                    self.monitor.record_connection_event(
                        &self.name,
                        ConnectionEventKind::Retry,
                        format!("attempt {attempt}: {e}"),
                    );

                    let delay = self.strategy.get_delay(None);
                    self.strategy.record_failure();
                    if !self.strategy.should_retry() {
                        warn!(link = %self.name, attempts = attempt, "Reconnect attempts exhausted");
                        return Err(LinkError::AttemptsExhausted {
                            link: self.name.clone(),
                            attempts: attempt,
                        });
                    }

                    warn!(
                        link = %self.name,
                        attempt,
                        category = %category,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Connect failed, backing off"
                    );
                    if !self.strategy.wait(cancel, Some(delay)).await {
                        return Err(LinkError::Cancelled { link: self.name.clone() });
                    }
                }
            }
        }
    }

    /// Starts the drain worker. Must be called from within a Tokio runtime.
    pub fn start(&mut self) {
        self.queue.start();
    }

    pub async fn stop(&mut self, timeout: Duration) -> LinkResult<()> {
        self.queue.stop(timeout).await
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        LinkSnapshot {
            name: self.name.clone(),
            breaker: self.breaker.snapshot(),
            reconnect: self.strategy.snapshot(),
            queue: self.queue.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::monitor::MonitorConfig;
    use crate::queue::send_fn;
    use crate::resilience::CircuitState;
    use crate::time::MockClock;

    fn guard(sender: impl PacketSender, config: LinkGuardConfig) -> (LinkGuard, MockClock) {
        let clock = MockClock::new();
        let shared: SharedClock = Arc::new(clock.clone());
        let monitor = Arc::new(
            BridgeHealthMonitor::with_clock(MonitorConfig::default(), Arc::clone(&shared))
                .expect("valid monitor"),
        );
        let guard = LinkGuard::new("mesh", config, sender, monitor, shared).expect("valid guard");
        (guard, clock)
    }

    fn ok_sender() -> impl PacketSender {
        send_fn(|_payload: Vec<u8>| async { Ok::<_, BoxError>(()) })
    }

    #[test]
    fn test_presets_pick_outbound_direction() {
        assert_eq!(LinkGuardConfig::mesh_radio().outbound, Direction::OverlayToMesh);
        assert_eq!(LinkGuardConfig::overlay_network().outbound, Direction::MeshToOverlay);
    }

    #[test]
    fn test_submit_rejected_when_breaker_open() {
        let (guard, _) = guard(ok_sender(), LinkGuardConfig::mesh_radio());
        for _ in 0..5 {
            guard.breaker().record_failure();
        }
        let err = guard.submit(vec![1]).expect_err("breaker is open");
        assert!(matches!(err, LinkError::CircuitOpen { .. }));
        assert_eq!(guard.queue().pending(), 0);
    }

    #[test]
    fn test_submit_reports_full_queue() {
        let config = LinkGuardConfig::mesh_radio().with_queue(TxQueueConfig::with_capacity(1));
        let (guard, _) = guard(ok_sender(), config);
        guard.submit(vec![1]).expect("queued");
        let err = guard.submit(vec![2]).expect_err("queue full");
        assert!(matches!(err, LinkError::QueueFull { .. }));
        assert_eq!(guard.queue().dropped(), 1);
    }

    #[tokio::test]
    async fn test_reporting_sender_updates_breaker_and_monitor() {
        let clock: SharedClock = Arc::new(MockClock::new());
        let monitor = Arc::new(
            BridgeHealthMonitor::with_clock(MonitorConfig::default(), Arc::clone(&clock))
                .expect("valid"),
        );
        let config = CircuitBreakerConfig::builder().failure_threshold(2).build().expect("valid");
        let breaker = Arc::new(CircuitBreaker::with_clock("overlay", config, clock).expect("valid"));
        let sender = ReportingSender::new(
            "overlay",
            Direction::MeshToOverlay,
            send_fn(|payload: Vec<u8>| async move {
                if payload.is_empty() {
                    Err::<(), BoxError>("connection reset by peer".into())
                } else {
                    Ok(())
                }
            }),
            Arc::clone(&breaker),
            Arc::clone(&monitor),
        );

        sender.send(vec![1]).await.expect("sent");
        assert!(sender.send(Vec::new()).await.is_err());
        assert!(sender.send(Vec::new()).await.is_err());

        assert_eq!(breaker.state(), CircuitState::Open);
        let summary = monitor.get_summary();
        assert_eq!(summary.messages.sent.mesh_to_overlay, 1);
        assert_eq!(summary.messages.failed.mesh_to_overlay, 2);
        assert_eq!(summary.errors.transient, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_backoff_recovers_and_engages_slow_start() {
        let (guard, _) = guard(ok_sender(), LinkGuardConfig::mesh_radio());
        guard.breaker().record_failure();
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        let conn = guard
            .connect_with_backoff(&cancel, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err::<&str, BoxError>("connection refused".into())
                    } else {
                        Ok("radio")
                    }
                }
            })
            .await
            .expect("connects on third attempt");

        assert_eq!(conn, "radio");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(guard.strategy().attempts(), 0);
        assert!(guard.strategy().in_slow_start());
        assert_eq!(guard.breaker().failures(), 0);
        assert!(guard.monitor().is_connected("mesh"));
        assert_eq!(guard.monitor().get_error_rate(Duration::from_secs(600)).transient, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_backoff_gives_up() {
        let config = LinkGuardConfig::mesh_radio().with_reconnect(
            ReconnectConfig::builder().max_attempts(3).build().expect("valid"),
        );
        let (guard, _) = guard(ok_sender(), config);
        let cancel = CancellationToken::new();

        let err = guard
            .connect_with_backoff(&cancel, || async { Err::<(), BoxError>("no such device".into()) })
            .await
            .expect_err("never connects");

        assert!(matches!(err, LinkError::AttemptsExhausted { attempts: 3, .. }));
        assert_eq!(guard.monitor().get_error_rate(Duration::from_secs(600)).permanent, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_with_backoff_honours_cancel() {
        let (guard, _) = guard(ok_sender(), LinkGuardConfig::mesh_radio());
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let err = guard
            .connect_with_backoff(&cancel, || async { Err::<(), BoxError>("timed out".into()) })
            .await
            .expect_err("cancelled");
        assert!(err.is_cancellation());
    }
}
