//! Explicit context shared by every bridge component.
//!
//! The application builds one [`BridgeContext`] at start-up and passes it by
//! reference to whatever needs the monitor or the probe. There is no global
//! instance.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::LinkResult;
use crate::link::{LinkGuard, LinkGuardConfig};
use crate::monitor::{BridgeHealthMonitor, BridgeSummary, MonitorConfig};
use crate::probe::{ActiveHealthProbe, ProbeConfig, ServiceStatus};
use crate::queue::PacketSender;
use crate::time::{system_clock, SharedClock};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeContextConfig {
    pub monitor: MonitorConfig,
    pub probe: ProbeConfig,
}

/// Combined view for a status surface.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeReport {
    pub bridge: BridgeSummary,
    pub probes: BTreeMap<String, ServiceStatus>,
}

/// Owner of the bridge-wide monitor and health probe.
#[derive(Debug, Clone)]
pub struct BridgeContext {
    clock: SharedClock,
    monitor: Arc<BridgeHealthMonitor>,
    probe: Arc<ActiveHealthProbe>,
}

impl BridgeContext {
    pub fn new(config: BridgeContextConfig) -> LinkResult<Self> {
        Self::with_clock(config, system_clock())
    }

    pub fn with_defaults() -> LinkResult<Self> {
        Self::new(BridgeContextConfig::default())
    }

    pub fn with_clock(config: BridgeContextConfig, clock: SharedClock) -> LinkResult<Self> {
        let monitor = BridgeHealthMonitor::with_clock(config.monitor, Arc::clone(&clock))?;
        let probe = ActiveHealthProbe::with_clock(config.probe, Arc::clone(&clock))?;
        Ok(Self { clock, monitor: Arc::new(monitor), probe: Arc::new(probe) })
    }

    pub fn monitor(&self) -> &Arc<BridgeHealthMonitor> {
        &self.monitor
    }

    pub fn probe(&self) -> &Arc<ActiveHealthProbe> {
        &self.probe
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Builds the guard for one link, reporting into the shared monitor.
    ///
    /// When the probe has no check registered under `name`, the link's
    /// breaker is registered as its check.
    pub fn link(
        &self,
        name: &str,
        config: LinkGuardConfig,
        sender: impl PacketSender,
    ) -> LinkResult<LinkGuard> {
        let guard = LinkGuard::new(
            name,
            config,
            sender,
            Arc::clone(&self.monitor),
            Arc::clone(&self.clock),
        )?;
        if self.probe.get_status(name).is_none() {
            self.probe.register_check(name, guard.health_check());
        }
        info!(link = name, "Link guard created");
        Ok(guard)
    }

    /// Starts the health probe loop.
    pub fn start(&self) {
        self.probe.start();
    }

    /// Stops the health probe loop, waiting up to `timeout`.
    pub async fn stop(&self, timeout: Duration) -> LinkResult<()> {
        self.probe.stop(timeout).await
    }

    pub fn report(&self) -> BridgeReport {
        BridgeReport { bridge: self.monitor.get_summary(), probes: self.probe.get_all_status() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use crate::monitor::BridgeStatus;
    use crate::probe::{check_fn, HealthResult, HealthState};
    use crate::queue::send_fn;
    use crate::time::MockClock;

    fn sender() -> impl PacketSender {
        send_fn(|_payload: Vec<u8>| async { Ok::<_, BoxError>(()) })
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = BridgeContextConfig::default();
        config.probe.passes = 0;
        assert!(BridgeContext::new(config).is_err());
    }

    #[test]
    fn test_clones_share_components() {
        let ctx = BridgeContext::with_defaults().expect("valid");
        let other = ctx.clone();
        assert!(Arc::ptr_eq(ctx.monitor(), other.monitor()));
        assert!(Arc::ptr_eq(ctx.probe(), other.probe()));
    }

    #[test]
    fn test_debug_includes_clock() {
        let ctx = BridgeContext::with_clock(BridgeContextConfig::default(), Arc::new(MockClock::new()))
            .expect("valid");
        let rendered = format!("{ctx:?}");
        assert!(rendered.starts_with("BridgeContext"));
        assert!(rendered.contains("MockClock"));
    }

    #[tokio::test]
    async fn test_link_registers_breaker_check() {
        let ctx = BridgeContext::with_clock(BridgeContextConfig::default(), Arc::new(MockClock::new()))
            .expect("valid");
        let guard = ctx.link("mesh", LinkGuardConfig::mesh_radio(), sender()).expect("guard");

        assert_eq!(ctx.probe().services(), vec!["mesh".to_string()]);
        let result = ctx.probe().check_now("mesh").await;
        assert_eq!(result.reason, "circuit_closed");

        for _ in 0..5 {
            guard.breaker().record_failure();
        }
        assert!(!ctx.probe().check_now("mesh").await.healthy);
    }

    #[tokio::test]
    async fn test_link_keeps_existing_check() {
        let ctx = BridgeContext::with_defaults().expect("valid");
        ctx.probe().register_check(
            "overlay",
            check_fn(|| async { Ok::<_, BoxError>(HealthResult::pass("socket_ok")) }),
        );
        let _guard = ctx.link("overlay", LinkGuardConfig::overlay_network(), sender()).expect("guard");

        assert_eq!(ctx.probe().check_now("overlay").await.reason, "socket_ok");
    }

    #[tokio::test]
    async fn test_report_combines_monitor_and_probe() {
        let ctx = BridgeContext::with_defaults().expect("valid");
        let _guard = ctx.link("mesh", LinkGuardConfig::mesh_radio(), sender()).expect("guard");

        let report = ctx.report();
        assert_eq!(report.bridge.bridge_status, BridgeStatus::Offline);
        assert_eq!(report.probes["mesh"].state, HealthState::Unknown);

        let json = serde_json::to_value(&report).expect("serialize");
        assert_eq!(json["probes"]["mesh"]["state"], "unknown");
    }
}
