//! Bounded transmit queue with a dedicated drain worker.
//!
//! Producers call [`TxQueue::enqueue`], which never blocks: when the queue is
//! full the new packet is rejected and counted as dropped. A single drain task
//! pops packets in FIFO order, waits for the optional pacing delay and hands
//! each packet to the [`PacketSender`]. A failing or panicking send is logged
//! and the loop moves on to the next packet.
//!
//! Stopping the worker leaves unsent packets in the queue; a later
//! [`TxQueue::start`] resumes draining them, and [`TxQueue::clear`] discards
//! them.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{panic_message, BoxError, ConfigError, ConfigResult, LinkError, LinkResult};

const WORKER_NAME: &str = "tx-drain";

/// Transport send seam. One call transmits one packet.
#[async_trait]
pub trait PacketSender: Send + Sync + 'static {
    async fn send(&self, payload: Vec<u8>) -> Result<(), BoxError>;
}

#[async_trait]
impl<T: PacketSender + ?Sized> PacketSender for Arc<T> {
    async fn send(&self, payload: Vec<u8>) -> Result<(), BoxError> {
        (**self).send(payload).await
    }
}

/// [`PacketSender`] backed by an async closure. Built by [`send_fn`].
pub struct SendFn<F> {
    f: F,
}

impl<F> fmt::Debug for SendFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SendFn").finish_non_exhaustive()
    }
}

/// Wraps an async closure as a [`PacketSender`].
pub fn send_fn<F, Fut>(f: F) -> SendFn<F>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    SendFn { f }
}

#[async_trait]
impl<F, Fut> PacketSender for SendFn<F>
where
    F: Fn(Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
{
    async fn send(&self, payload: Vec<u8>) -> Result<(), BoxError> {
        (self.f)(payload).await
    }
}

/// Pacing function consulted before every send.
pub type DelayFn = Arc<dyn Fn() -> Duration + Send + Sync>;

/// Queue sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxQueueConfig {
    /// Packets held before new ones are rejected.
    pub capacity: usize,
}

impl Default for TxQueueConfig {
    fn default() -> Self {
        Self { capacity: 32 }
    }
}

impl TxQueueConfig {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.capacity == 0 {
            return Err(ConfigError::invalid("capacity", "must be greater than 0"));
        }
        Ok(())
    }
}

/// Counters exposed to dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TxQueueStats {
    pub pending: usize,
    pub capacity: usize,
    pub dropped: u64,
    pub sent: u64,
    pub send_errors: u64,
}

#[derive(Default)]
struct QueueShared {
    items: Mutex<VecDeque<Vec<u8>>>,
    ready: Notify,
    dropped: AtomicU64,
    sent: AtomicU64,
    send_errors: AtomicU64,
}

/// Bounded FIFO of outbound packets for one link.
pub struct TxQueue {
    name: String,
    config: TxQueueConfig,
    shared: Arc<QueueShared>,
    sender: Arc<dyn PacketSender>,
    delay_fn: Option<DelayFn>,
    cancellation: CancellationToken,
    task_handle: Option<JoinHandle<()>>,
}

impl fmt::Debug for TxQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TxQueue")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("stats", &self.stats())
            .field("running", &self.is_running())
            .finish()
    }
}

impl TxQueue {
    pub fn new(
        name: impl Into<String>,
        config: TxQueueConfig,
        sender: impl PacketSender,
    ) -> ConfigResult<Self> {
        config.validate()?;
        Ok(Self {
            name: name.into(),
            shared: Arc::new(QueueShared {
                items: Mutex::new(VecDeque::with_capacity(config.capacity)),
                ..QueueShared::default()
            }),
            config,
            sender: Arc::new(sender),
            delay_fn: None,
            cancellation: CancellationToken::new(),
            task_handle: None,
        })
    }

    /// Sets the pacing function; its result is slept before each send.
    /// Takes effect at the next [`start`](Self::start).
    pub fn with_pacing<F>(mut self, delay_fn: F) -> Self
    where
        F: Fn() -> Duration + Send + Sync + 'static,
    {
        self.delay_fn = Some(Arc::new(delay_fn));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Queues `payload` for transmission. Returns `false`, and counts a drop,
    /// when the queue is full.
    pub fn enqueue(&self, payload: Vec<u8>) -> bool {
        {
            let mut items = self.shared.items.lock();
            if items.len() < self.config.capacity {
                items.push_back(payload);
                drop(items);
                self.shared.ready.notify_one();
                return true;
            }
        }

        let dropped = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(queue = %self.name, dropped, "TX queue full, packet dropped");
        false
    }

    pub fn pending(&self) -> usize {
        self.shared.items.lock().len()
    }

    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn sent(&self) -> u64 {
        self.shared.sent.load(Ordering::Relaxed)
    }

    pub fn send_errors(&self) -> u64 {
        self.shared.send_errors.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> TxQueueStats {
        TxQueueStats {
            pending: self.pending(),
            capacity: self.config.capacity,
            dropped: self.dropped(),
            sent: self.sent(),
            send_errors: self.send_errors(),
        }
    }

    /// Discards every queued packet and returns how many there were.
    pub fn clear(&self) -> usize {
        let mut items = self.shared.items.lock();
        let discarded = items.len();
        items.clear();
        discarded
    }

    pub fn is_running(&self) -> bool {
        self.task_handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Spawns the drain worker. A no-op if it is already running.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&mut self) {
        if self.is_running() {
            if self.cancellation.is_cancelled() {
                debug!(queue = %self.name, "Previous TX drain worker still finishing, start ignored");
            }
            return;
        }

        info!(queue = %self.name, capacity = self.config.capacity, "Starting TX drain worker");

        self.cancellation = CancellationToken::new();
        let handle = tokio::spawn(drain_worker(
            self.name.clone(),
            Arc::clone(&self.shared),
            Arc::clone(&self.sender),
            self.delay_fn.clone(),
            self.cancellation.clone(),
        ));
        self.task_handle = Some(handle);
    }

    /// Signals the drain worker and waits up to `timeout` for it to exit.
    ///
    /// An in-flight send is allowed to finish; packets still queued stay
    /// queued. A no-op if the worker is not running.
    ///
    /// On timeout the worker stays tracked: [`is_running`](Self::is_running)
    /// keeps reporting it and [`start`](Self::start) does not spawn a second
    /// worker until its send has returned.
    pub async fn stop(&mut self, timeout: Duration) -> LinkResult<()> {
        self.cancellation.cancel();

        let Some(mut handle) = self.task_handle.take() else {
            return Ok(());
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => {
                info!(queue = %self.name, pending = self.pending(), "TX drain worker stopped");
                Ok(())
            }
            Ok(Err(e)) => {
                warn!(queue = %self.name, error = %e, "TX drain worker panicked");
                Err(LinkError::WorkerPanicked { worker: WORKER_NAME, message: e.to_string() })
            }
            Err(_) => {
                warn!(
                    queue = %self.name,
                    timeout_ms = timeout.as_millis() as u64,
                    "TX drain worker did not stop in time"
                );
                self.task_handle = Some(handle);
                Err(LinkError::ShutdownTimeout { worker: WORKER_NAME, timeout })
            }
        }
    }
}

impl Drop for TxQueue {
    fn drop(&mut self) {
        if self.task_handle.is_some() {
            self.cancellation.cancel();
        }
    }
}

#[instrument(name = "tx_drain", skip_all, fields(queue = %name))]
async fn drain_worker(
    name: String,
    shared: Arc<QueueShared>,
    sender: Arc<dyn PacketSender>,
    delay_fn: Option<DelayFn>,
    cancel: CancellationToken,
) {
    loop {
        let payload = loop {
            if let Some(payload) = shared.items.lock().pop_front() {
                break payload;
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("TX drain worker cancelled while idle");
                    return;
                }
                _ = shared.ready.notified() => {}
            }
        };

        if let Some(delay) = delay_fn.as_ref().map(|f| f()).filter(|d| !d.is_zero()) {
            tokio::select! {
                _ = cancel.cancelled() => {
                    // Put the packet back so a restart can still deliver it.
                    shared.items.lock().push_front(payload);
                    debug!("TX drain worker cancelled while pacing");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        let len = payload.len();
        match AssertUnwindSafe(sender.send(payload)).catch_unwind().await {
            Ok(Ok(())) => {
                shared.sent.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                shared.send_errors.fetch_add(1, Ordering::Relaxed);
                error!(bytes = len, error = %e, "TX drain send error");
            }
            Err(panic) => {
                shared.send_errors.fetch_add(1, Ordering::Relaxed);
                error!(bytes = len, error = %panic_message(panic.as_ref()), "TX drain send panicked");
            }
        }

        if cancel.is_cancelled() {
            debug!("TX drain worker cancelled");
            return;
        }
    }
}
