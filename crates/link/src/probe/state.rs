//! Per-service health state with hysteresis.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::serde_utils::duration_millis;

/// Health of one monitored service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Registered but not yet proven either way.
    Unknown,
    Healthy,
    Unhealthy,
    /// Passed at least once since going unhealthy, not yet proven healthy.
    Recovering,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthState::Unknown => "unknown",
            HealthState::Healthy => "healthy",
            HealthState::Unhealthy => "unhealthy",
            HealthState::Recovering => "recovering",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthResult {
    pub healthy: bool,
    pub reason: String,
    /// Time the check took, measured by the probe.
    #[serde(rename = "latency_ms", with = "duration_millis")]
    pub latency: Duration,
    pub timestamp: DateTime<Utc>,
}

impl HealthResult {
    /// A passing result stamped now.
    pub fn pass(reason: impl Into<String>) -> Self {
        Self::new(true, reason)
    }

    /// A failing result stamped now.
    pub fn fail(reason: impl Into<String>) -> Self {
        Self::new(false, reason)
    }

    pub fn new(healthy: bool, reason: impl Into<String>) -> Self {
        Self { healthy, reason: reason.into(), latency: Duration::ZERO, timestamp: Utc::now() }
    }

    pub(crate) fn stamped(mut self, latency: Duration, timestamp: DateTime<Utc>) -> Self {
        self.latency = latency;
        self.timestamp = timestamp;
        self
    }
}

/// Consecutive-result thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Hysteresis {
    pub passes: u32,
    pub fails: u32,
}

/// Mutable record kept for each registered service.
#[derive(Debug, Clone)]
pub struct ServiceHealthState {
    pub name: String,
    pub state: HealthState,
    pub consecutive_passes: u32,
    pub consecutive_fails: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub last_result: Option<HealthResult>,
    pub total_checks: u64,
    pub total_passes: u64,
    pub total_fails: u64,
}

impl ServiceHealthState {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: HealthState::Unknown,
            consecutive_passes: 0,
            consecutive_fails: 0,
            last_check: None,
            last_result: None,
            total_checks: 0,
            total_passes: 0,
            total_fails: 0,
        }
    }

    /// Share of checks that passed, 0-100. Zero before the first check.
    pub fn uptime_percent(&self) -> f64 {
        if self.total_checks == 0 {
            return 0.0;
        }
        self.total_passes as f64 / self.total_checks as f64 * 100.0
    }

    /// Folds one result into the counters and the state machine. Returns the
    /// previous state when the result caused a transition.
    pub(crate) fn apply(
        &mut self,
        result: HealthResult,
        thresholds: Hysteresis,
    ) -> Option<HealthState> {
        let previous = self.state;
        self.last_check = Some(result.timestamp);
        self.total_checks += 1;

        if result.healthy {
            self.consecutive_passes += 1;
            self.consecutive_fails = 0;
            self.total_passes += 1;

            if self.state != HealthState::Healthy {
                if self.consecutive_passes >= thresholds.passes {
                    self.state = HealthState::Healthy;
                    self.consecutive_passes = 0;
                } else if self.state == HealthState::Unhealthy {
                    self.state = HealthState::Recovering;
                }
            }
        } else {
            self.consecutive_fails += 1;
            self.consecutive_passes = 0;
            self.total_fails += 1;

            if self.state != HealthState::Unhealthy {
                if self.consecutive_fails >= thresholds.fails {
                    self.state = HealthState::Unhealthy;
                    self.consecutive_fails = 0;
                } else if self.state == HealthState::Recovering {
                    self.state = HealthState::Unhealthy;
                }
            }
        }

        self.last_result = Some(result);
        (previous != self.state).then_some(previous)
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            name: self.name.clone(),
            state: self.state,
            consecutive_passes: self.consecutive_passes,
            consecutive_fails: self.consecutive_fails,
            last_check: self.last_check,
            last_result: self.last_result.as_ref().map(|r| LastResult {
                healthy: r.healthy,
                reason: r.reason.clone(),
                latency_ms: r.latency.as_secs_f64() * 1000.0,
            }),
            uptime_percent: (self.uptime_percent() * 10.0).round() / 10.0,
            total_checks: self.total_checks,
        }
    }
}

/// Serializable summary of one service, for dashboards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub name: String,
    pub state: HealthState,
    pub consecutive_passes: u32,
    pub consecutive_fails: u32,
    pub last_check: Option<DateTime<Utc>>,
    pub last_result: Option<LastResult>,
    /// Rounded to one decimal place.
    pub uptime_percent: f64,
    pub total_checks: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LastResult {
    pub healthy: bool,
    pub reason: String,
    pub latency_ms: f64,
}
