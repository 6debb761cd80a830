//! Cross-link health aggregation.
//!
//! [`BridgeHealthMonitor`] is the single place where both links report
//! connection transitions, relayed-message outcomes and errors. From that it
//! derives an overall [`BridgeStatus`], a human-readable degraded reason and
//! a serializable [`BridgeSummary`] for status surfaces.
//!
//! All state sits behind one mutex; every method is a short critical section
//! and never awaits.

pub mod classify;
pub mod summary;
pub mod window;

use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
pub use classify::{classify_error, classify_message, ErrorCategory};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
pub use summary::{
    BridgeStatus, BridgeSummary, ConnectionSummary, DirectionCounts, ErrorCounts, MessageSummary,
};
use tracing::{debug, info, warn};
use window::RollingWindow;

use crate::error::{ConfigError, ConfigResult};
use crate::serde_utils::duration_millis;
use crate::time::{system_clock, SharedClock};

/// Service name of the radio mesh link.
pub const MESH: &str = "mesh";
/// Service name of the overlay network link.
pub const OVERLAY: &str = "overlay";

/// Longest error message kept on an [`ErrorEvent`], in characters.
const MAX_ERROR_MESSAGE: usize = 200;

/// Direction a relayed message travelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    MeshToOverlay,
    OverlayToMesh,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::MeshToOverlay => "mesh_to_overlay",
            Direction::OverlayToMesh => "overlay_to_mesh",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionEventKind {
    Connected,
    Disconnected,
    Error,
    Retry,
}

impl ConnectionEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionEventKind::Connected => "connected",
            ConnectionEventKind::Disconnected => "disconnected",
            ConnectionEventKind::Error => "error",
            ConnectionEventKind::Retry => "retry",
        }
    }
}

impl fmt::Display for ConnectionEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionEvent {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub event: ConnectionEventKind,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEvent {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub category: ErrorCategory,
    /// Truncated to 200 characters.
    pub message: String,
    pub is_retriable: bool,
}

/// Thresholds and window sizes for the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Services tracked from the start. Others are added on first event.
    pub services: Vec<String>,
    /// Capacity of each rolling event window.
    pub window_size: usize,
    /// Window used for the status error count.
    #[serde(with = "duration_millis")]
    pub error_window: Duration,
    /// Errors within `error_window` at which the bridge reads as degraded.
    pub degraded_error_threshold: u64,
    /// Errors within `error_window` above which bridging should pause.
    pub pause_error_threshold: u64,
    /// Default window for message and error rates in the summary.
    #[serde(with = "duration_millis")]
    pub rate_window: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            services: vec![MESH.to_string(), OVERLAY.to_string()],
            window_size: 1000,
            error_window: Duration::from_secs(60),
            degraded_error_threshold: 10,
            pause_error_threshold: 20,
            rate_window: Duration::from_secs(300),
        }
    }
}

impl MonitorConfig {
    pub fn builder() -> MonitorConfigBuilder {
        MonitorConfigBuilder::default()
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.services.is_empty() {
            return Err(ConfigError::invalid("services", "at least one service is required"));
        }
        if self.window_size == 0 {
            return Err(ConfigError::invalid("window_size", "must be greater than 0"));
        }
        if self.error_window.is_zero() {
            return Err(ConfigError::invalid("error_window", "must be greater than 0"));
        }
        if self.rate_window.is_zero() {
            return Err(ConfigError::invalid("rate_window", "must be greater than 0"));
        }
        if self.degraded_error_threshold == 0 {
            return Err(ConfigError::invalid("degraded_error_threshold", "must be greater than 0"));
        }
        if self.pause_error_threshold < self.degraded_error_threshold {
            return Err(ConfigError::invalid(
                "pause_error_threshold",
                "must be >= degraded_error_threshold",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MonitorConfigBuilder {
    config: MonitorConfig,
}

impl MonitorConfigBuilder {
    pub fn services<I, S>(mut self, services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.services = services.into_iter().map(Into::into).collect();
        self
    }

    pub fn window_size(mut self, size: usize) -> Self {
        self.config.window_size = size;
        self
    }

    pub fn error_window(mut self, window: Duration) -> Self {
        self.config.error_window = window;
        self
    }

    pub fn error_thresholds(mut self, degraded: u64, pause: u64) -> Self {
        self.config.degraded_error_threshold = degraded;
        self.config.pause_error_threshold = pause;
        self
    }

    pub fn rate_window(mut self, window: Duration) -> Self {
        self.config.rate_window = window;
        self
    }

    pub fn build(self) -> ConfigResult<MonitorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[derive(Debug, Default)]
struct ServiceConnection {
    connected: bool,
    connected_at: Option<Instant>,
    last_connected: Option<DateTime<Utc>>,
    last_disconnected: Option<DateTime<Utc>>,
    reconnect_count: u64,
    uptime: Duration,
}

impl ServiceConnection {
    fn uptime_at(&self, now: Instant) -> Duration {
        match (self.connected, self.connected_at) {
            (true, Some(at)) => self.uptime + now.saturating_duration_since(at),
            _ => self.uptime,
        }
    }
}

struct MonitorState {
    services: BTreeMap<String, ServiceConnection>,
    sent: DirectionCounts,
    failed: DirectionCounts,
    requeued: u64,
    connection_events: RollingWindow<ConnectionEvent>,
    error_events: RollingWindow<ErrorEvent>,
    message_times: RollingWindow<()>,
}

/// Bridge-wide health aggregator. One instance per process, shared by
/// reference.
pub struct BridgeHealthMonitor {
    config: MonitorConfig,
    started: Instant,
    state: Mutex<MonitorState>,
    clock: SharedClock,
}

impl fmt::Debug for BridgeHealthMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeHealthMonitor")
            .field("config", &self.config)
            .field("status", &self.get_bridge_status())
            .finish()
    }
}

impl BridgeHealthMonitor {
    pub fn new(config: MonitorConfig) -> ConfigResult<Self> {
        Self::with_clock(config, system_clock())
    }

    pub fn with_clock(config: MonitorConfig, clock: SharedClock) -> ConfigResult<Self> {
        config.validate()?;
        let services = config
            .services
            .iter()
            .map(|name| (name.clone(), ServiceConnection::default()))
            .collect();
        let window = config.window_size;
        Ok(Self {
            started: clock.now(),
            state: Mutex::new(MonitorState {
                services,
                sent: DirectionCounts::default(),
                failed: DirectionCounts::default(),
                requeued: 0,
                connection_events: RollingWindow::new(window),
                error_events: RollingWindow::new(window),
                message_times: RollingWindow::new(window),
            }),
            config,
            clock,
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Records a connection transition for `service`.
    ///
    /// `Connected` counts a reconnect only on a disconnected-to-connected
    /// edge. `Disconnected` and `Error` close the current uptime span.
    /// `Retry` is recorded in the event window only and never registers an
    /// unknown service.
    pub fn record_connection_event(
        &self,
        service: &str,
        event: ConnectionEventKind,
        detail: impl Into<String>,
    ) {
        let now = self.clock.now();
        let wall = self.clock.wall_time();
        let detail = detail.into();

        let mut state = self.state.lock();

        match event {
            ConnectionEventKind::Connected => {
                let conn = state.services.entry(service.to_string()).or_default();
                if !conn.connected {
                    conn.connected = true;
                    conn.connected_at = Some(now);
                    conn.last_connected = Some(wall);
                    conn.reconnect_count += 1;
                    info!(service, reconnect_count = conn.reconnect_count, "Link connected");
                }
            }
            ConnectionEventKind::Disconnected | ConnectionEventKind::Error => {
                let conn = state.services.entry(service.to_string()).or_default();
                if conn.connected {
                    if let Some(at) = conn.connected_at.take() {
                        conn.uptime += now.saturating_duration_since(at);
                    }
                    warn!(service, event = %event, detail = %detail, "Link lost");
                }
                conn.connected = false;
                conn.last_disconnected = Some(wall);
            }
            ConnectionEventKind::Retry => {
                debug!(service, detail = %detail, "Link retry");
            }
        }

        state.connection_events.push(
            now,
            ConnectionEvent { timestamp: wall, service: service.to_string(), event, detail },
        );
    }

    pub fn record_message_sent(&self, direction: Direction) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        match direction {
            Direction::MeshToOverlay => state.sent.mesh_to_overlay += 1,
            Direction::OverlayToMesh => state.sent.overlay_to_mesh += 1,
        }
        state.message_times.push(now, ());
    }

    /// Records a failed relay. `requeued` marks messages the caller saved for
    /// a later attempt.
    pub fn record_message_failed(&self, direction: Direction, requeued: bool) {
        let mut state = self.state.lock();
        match direction {
            Direction::MeshToOverlay => state.failed.mesh_to_overlay += 1,
            Direction::OverlayToMesh => state.failed.overlay_to_mesh += 1,
        }
        if requeued {
            state.requeued += 1;
        }
    }

    /// Classifies and records an error. Returns the category.
    pub fn record_error(&self, service: &str, error: &(dyn Error + 'static)) -> ErrorCategory {
        let category = classify_error(error);
        self.push_error(service, category, &error.to_string());
        category
    }

    /// Records an error known only by its message.
    pub fn record_error_message(&self, service: &str, message: &str) -> ErrorCategory {
        let category = classify_message(message).unwrap_or(ErrorCategory::Unknown);
        self.push_error(service, category, message);
        category
    }

    fn push_error(&self, service: &str, category: ErrorCategory, message: &str) {
        let message: String = message.chars().take(MAX_ERROR_MESSAGE).collect();
        debug!(service, category = %category, error = %message, "Recorded link error");

        let event = ErrorEvent {
            timestamp: self.clock.wall_time(),
            service: service.to_string(),
            category,
            message,
            is_retriable: category.is_retriable(),
        };
        let now = self.clock.now();
        self.state.lock().error_events.push(now, event);
    }

    /// Relayed messages per minute over `window`.
    pub fn get_message_rate(&self, window: Duration) -> f64 {
        if window.is_zero() {
            return 0.0;
        }
        let now = self.clock.now();
        let recent = self.state.lock().message_times.count_within(now, window);
        recent as f64 / window.as_secs_f64() * 60.0
    }

    /// Error counts by category over `window`.
    pub fn get_error_rate(&self, window: Duration) -> ErrorCounts {
        let now = self.clock.now();
        error_counts(&self.state.lock(), now, window)
    }

    /// Share of the monitor's lifetime `service` has been connected, 0-100.
    pub fn get_uptime_percent(&self, service: &str) -> f64 {
        let now = self.clock.now();
        let state = self.state.lock();
        self.uptime_percent(&state, service, now)
    }

    pub fn is_connected(&self, service: &str) -> bool {
        self.state.lock().services.get(service).is_some_and(|c| c.connected)
    }

    pub fn get_bridge_status(&self) -> BridgeStatus {
        let now = self.clock.now();
        self.status(&self.state.lock(), now)
    }

    /// Why the bridge is not healthy, e.g. `"overlay disconnected; High
    /// error rate (12/min)"`. `None` when nothing is wrong.
    pub fn get_degraded_reason(&self) -> Option<String> {
        let now = self.clock.now();
        self.degraded_reason(&self.state.lock(), now)
    }

    /// Any link connected and the error rate below the degraded threshold.
    pub fn is_healthy(&self) -> bool {
        let now = self.clock.now();
        let state = self.state.lock();
        let any_connected = state.services.values().any(|c| c.connected);
        any_connected && self.recent_errors(&state, now) < self.config.degraded_error_threshold
    }

    /// True when forwarding should halt: no link up, or the error rate is
    /// above the pause threshold.
    pub fn should_pause_bridging(&self) -> bool {
        let now = self.clock.now();
        let state = self.state.lock();
        self.status(&state, now) == BridgeStatus::Offline
            || self.recent_errors(&state, now) > self.config.pause_error_threshold
    }

    /// The `n` most recent error events, newest last.
    pub fn recent_error_events(&self, n: usize) -> Vec<ErrorEvent> {
        self.state.lock().error_events.latest(n).cloned().collect()
    }

    /// The `n` most recent connection events, newest last.
    pub fn recent_connection_events(&self, n: usize) -> Vec<ConnectionEvent> {
        self.state.lock().connection_events.latest(n).cloned().collect()
    }

    pub fn get_summary(&self) -> BridgeSummary {
        let now = self.clock.now();
        let state = self.state.lock();

        let connections = state
            .services
            .iter()
            .map(|(name, conn)| {
                let summary = ConnectionSummary {
                    connected: conn.connected,
                    uptime_percent: self.uptime_percent(&state, name, now),
                    reconnect_count: conn.reconnect_count,
                    last_connected: conn.last_connected,
                    last_disconnected: conn.last_disconnected,
                };
                (name.clone(), summary)
            })
            .collect();

        let rate_window = self.config.rate_window;
        let recent_messages = state.message_times.count_within(now, rate_window);

        BridgeSummary {
            uptime_seconds: now.saturating_duration_since(self.started).as_secs_f64(),
            connections,
            messages: MessageSummary {
                sent: state.sent,
                failed: state.failed,
                requeued: state.requeued,
                rate_per_min: recent_messages as f64 / rate_window.as_secs_f64() * 60.0,
            },
            errors: error_counts(&state, now, rate_window),
            bridge_status: self.status(&state, now),
            degraded_reason: self.degraded_reason(&state, now),
        }
    }

    fn recent_errors(&self, state: &MonitorState, now: Instant) -> u64 {
        state.error_events.count_within(now, self.config.error_window) as u64
    }

    fn status(&self, state: &MonitorState, now: Instant) -> BridgeStatus {
        let connected = state.services.values().filter(|c| c.connected).count();
        if connected == 0 {
            return BridgeStatus::Offline;
        }
        let all_connected = connected == state.services.len();
        if all_connected && self.recent_errors(state, now) < self.config.degraded_error_threshold {
            BridgeStatus::Healthy
        } else {
            BridgeStatus::Degraded
        }
    }

    fn degraded_reason(&self, state: &MonitorState, now: Instant) -> Option<String> {
        let mut reasons: Vec<String> = state
            .services
            .iter()
            .filter(|(_, conn)| !conn.connected)
            .map(|(name, _)| format!("{name} disconnected"))
            .collect();

        let errors = self.recent_errors(state, now);
        if errors >= self.config.degraded_error_threshold {
            reasons.push(format!("High error rate ({errors}/min)"));
        }

        (!reasons.is_empty()).then(|| reasons.join("; "))
    }

    fn uptime_percent(&self, state: &MonitorState, service: &str, now: Instant) -> f64 {
        let total = now.saturating_duration_since(self.started);
        if total.is_zero() {
            return 0.0;
        }
        let uptime = state.services.get(service).map_or(Duration::ZERO, |c| c.uptime_at(now));
        (uptime.as_secs_f64() / total.as_secs_f64() * 100.0).min(100.0)
    }
}

fn error_counts(state: &MonitorState, now: Instant, window: Duration) -> ErrorCounts {
    let mut counts = ErrorCounts::default();
    for event in state.error_events.within(now, window) {
        counts.add(event.category);
    }
    counts
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::Arc;

    use super::*;
    use crate::time::MockClock;

    fn monitor() -> (BridgeHealthMonitor, MockClock) {
        let clock = MockClock::new();
        let monitor = BridgeHealthMonitor::with_clock(MonitorConfig::default(), Arc::new(clock.clone()))
            .expect("valid config");
        (monitor, clock)
    }

    fn refused() -> io::Error {
        io::Error::new(io::ErrorKind::ConnectionRefused, "connection refused")
    }

    #[test]
    fn test_config_validation() {
        assert!(MonitorConfig::default().validate().is_ok());
        assert!(MonitorConfig::builder().services(Vec::<String>::new()).build().is_err());
        assert!(MonitorConfig::builder().window_size(0).build().is_err());
        assert!(MonitorConfig::builder().error_thresholds(10, 5).build().is_err());
        assert!(MonitorConfig::builder().error_window(Duration::ZERO).build().is_err());
    }

    #[test]
    fn test_offline_with_nothing_connected() {
        let (m, _) = monitor();
        assert_eq!(m.get_bridge_status(), BridgeStatus::Offline);
        assert!(m.should_pause_bridging());
        assert!(!m.is_healthy());
        assert_eq!(
            m.get_degraded_reason().as_deref(),
            Some("mesh disconnected; overlay disconnected")
        );
    }

    #[test]
    fn test_healthy_then_degraded_on_single_disconnect() {
        let (m, _) = monitor();
        m.record_connection_event(MESH, ConnectionEventKind::Connected, "");
        m.record_connection_event(OVERLAY, ConnectionEventKind::Connected, "");
        assert_eq!(m.get_bridge_status(), BridgeStatus::Healthy);
        assert_eq!(m.get_degraded_reason(), None);

        m.record_connection_event(OVERLAY, ConnectionEventKind::Disconnected, "socket closed");
        assert_eq!(m.get_bridge_status(), BridgeStatus::Degraded);
        assert_eq!(m.get_degraded_reason().as_deref(), Some("overlay disconnected"));
        assert!(m.is_healthy());
        assert!(!m.should_pause_bridging());
    }

    #[test]
    fn test_error_rate_thresholds() {
        let (m, clock) = monitor();
        m.record_connection_event(MESH, ConnectionEventKind::Connected, "");
        m.record_connection_event(OVERLAY, ConnectionEventKind::Connected, "");

        for _ in 0..9 {
            m.record_error(MESH, &refused());
        }
        assert_eq!(m.get_bridge_status(), BridgeStatus::Healthy);

        m.record_error(MESH, &refused());
        assert_eq!(m.get_bridge_status(), BridgeStatus::Degraded);
        assert_eq!(m.get_degraded_reason().as_deref(), Some("High error rate (10/min)"));
        assert!(!m.is_healthy());

        for _ in 0..10 {
            m.record_error(MESH, &refused());
        }
        assert!(!m.should_pause_bridging());
        m.record_error(MESH, &refused());
        assert!(m.should_pause_bridging());

        clock.advance_secs(61);
        assert_eq!(m.get_bridge_status(), BridgeStatus::Healthy);
        assert!(!m.should_pause_bridging());
        assert_eq!(m.get_error_rate(Duration::from_secs(300)).transient, 21);
    }

    #[test]
    fn test_reconnect_count_only_on_edges() {
        let (m, _) = monitor();
        m.record_connection_event(MESH, ConnectionEventKind::Connected, "");
        m.record_connection_event(MESH, ConnectionEventKind::Connected, "duplicate");
        m.record_connection_event(MESH, ConnectionEventKind::Retry, "");
        m.record_connection_event(MESH, ConnectionEventKind::Error, "reset");
        m.record_connection_event(MESH, ConnectionEventKind::Connected, "");

        let summary = m.get_summary();
        assert_eq!(summary.connections[MESH].reconnect_count, 2);
        assert!(summary.connections[MESH].last_disconnected.is_some());
        assert_eq!(m.recent_connection_events(10).len(), 5);
    }

    #[test]
    fn test_uptime_accumulates_and_is_bounded() {
        let (m, clock) = monitor();
        clock.advance_secs(10);
        m.record_connection_event(MESH, ConnectionEventKind::Connected, "");
        clock.advance_secs(30);
        m.record_connection_event(MESH, ConnectionEventKind::Disconnected, "");
        clock.advance_secs(60);

        assert!((m.get_uptime_percent(MESH) - 30.0).abs() < 1e-9);

        m.record_connection_event(MESH, ConnectionEventKind::Connected, "");
        clock.advance_secs(100);
        assert!((m.get_uptime_percent(MESH) - 65.0).abs() < 1e-9);
        assert!(m.get_uptime_percent(MESH) <= 100.0);
        assert_eq!(m.get_uptime_percent("unknown-link"), 0.0);
    }

    #[test]
    fn test_message_counters_and_rate() {
        let (m, clock) = monitor();
        for _ in 0..30 {
            m.record_message_sent(Direction::MeshToOverlay);
        }
        m.record_message_sent(Direction::OverlayToMesh);
        m.record_message_failed(Direction::OverlayToMesh, true);
        m.record_message_failed(Direction::OverlayToMesh, false);

        assert!((m.get_message_rate(Duration::from_secs(60)) - 31.0).abs() < 1e-9);

        let summary = m.get_summary();
        assert_eq!(summary.messages.sent.mesh_to_overlay, 30);
        assert_eq!(summary.messages.sent.overlay_to_mesh, 1);
        assert_eq!(summary.messages.failed.overlay_to_mesh, 2);
        assert_eq!(summary.messages.requeued, 1);

        clock.advance_secs(120);
        assert_eq!(m.get_message_rate(Duration::from_secs(60)), 0.0);
        assert_eq!(m.get_message_rate(Duration::ZERO), 0.0);
    }

    #[test]
    fn test_error_events_are_truncated_and_flagged() {
        let (m, _) = monitor();
        let long = format!("checksum mismatch {}", "x".repeat(500));
        assert_eq!(m.record_error_message(MESH, &long), ErrorCategory::Unknown);
        assert_eq!(m.record_error(OVERLAY, &refused()), ErrorCategory::Transient);

        let events = m.recent_error_events(10);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].message.chars().count(), 200);
        assert!(!events[0].is_retriable);
        assert!(events[1].is_retriable);
    }

    #[test]
    fn test_unknown_service_is_auto_registered() {
        let (m, _) = monitor();
        m.record_connection_event("mqtt", ConnectionEventKind::Connected, "");
        assert!(m.is_connected("mqtt"));
        assert_eq!(m.get_bridge_status(), BridgeStatus::Degraded);
        assert!(m.get_summary().connections.contains_key("mqtt"));
    }

    #[test]
    fn test_retry_from_unknown_service_is_not_registered() {
        let (m, _) = monitor();
        m.record_connection_event(MESH, ConnectionEventKind::Connected, "");
        m.record_connection_event(OVERLAY, ConnectionEventKind::Connected, "");

        m.record_connection_event("gateway", ConnectionEventKind::Retry, "attempt 1");

        assert_eq!(m.get_bridge_status(), BridgeStatus::Healthy);
        assert_eq!(m.get_degraded_reason(), None);
        assert!(!m.get_summary().connections.contains_key("gateway"));
        assert_eq!(m.recent_connection_events(1)[0].service, "gateway");
    }

    #[test]
    fn test_window_evicts_silently() {
        let clock = MockClock::new();
        let config = MonitorConfig::builder().window_size(5).build().expect("valid");
        let m = BridgeHealthMonitor::with_clock(config, Arc::new(clock)).expect("valid");
        for _ in 0..50 {
            m.record_error(MESH, &refused());
        }
        assert_eq!(m.get_error_rate(Duration::from_secs(60)).total(), 5);
    }

    #[test]
    fn test_summary_serializes() {
        let (m, clock) = monitor();
        m.record_connection_event(MESH, ConnectionEventKind::Connected, "");
        clock.advance_secs(5);

        let json = serde_json::to_value(m.get_summary()).expect("serialize");
        assert_eq!(json["bridge_status"], "degraded");
        assert_eq!(json["connections"]["mesh"]["connected"], true);
        assert_eq!(json["connections"]["overlay"]["connected"], false);
        assert_eq!(json["messages"]["sent"]["mesh_to_overlay"], 0);
        assert_eq!(json["errors"]["transient"], 0);
        assert_eq!(json["uptime_seconds"], 5.0);
    }
}
