//! Serializable status types rendered by dashboards.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::classify::ErrorCategory;

/// Overall bridge health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BridgeStatus {
    /// Every link connected and the error rate is acceptable.
    Healthy,
    /// At least one link down, or too many recent errors.
    Degraded,
    /// No link connected.
    Offline,
}

impl BridgeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeStatus::Healthy => "healthy",
            BridgeStatus::Degraded => "degraded",
            BridgeStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for BridgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error counts per category over a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCounts {
    pub transient: u64,
    pub permanent: u64,
    pub unknown: u64,
}

impl ErrorCounts {
    pub fn total(&self) -> u64 {
        self.transient + self.permanent + self.unknown
    }

    pub(crate) fn add(&mut self, category: ErrorCategory) {
        match category {
            ErrorCategory::Transient => self.transient += 1,
            ErrorCategory::Permanent => self.permanent += 1,
            ErrorCategory::Unknown => self.unknown += 1,
        }
    }
}

/// Counter split by relay direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionCounts {
    pub mesh_to_overlay: u64,
    pub overlay_to_mesh: u64,
}

impl DirectionCounts {
    pub fn total(&self) -> u64 {
        self.mesh_to_overlay + self.overlay_to_mesh
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionSummary {
    pub connected: bool,
    pub uptime_percent: f64,
    pub reconnect_count: u64,
    pub last_connected: Option<DateTime<Utc>>,
    pub last_disconnected: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageSummary {
    pub sent: DirectionCounts,
    pub failed: DirectionCounts,
    pub requeued: u64,
    pub rate_per_min: f64,
}

/// Everything a status surface needs, computed in one pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BridgeSummary {
    pub uptime_seconds: f64,
    pub connections: BTreeMap<String, ConnectionSummary>,
    pub messages: MessageSummary,
    /// Errors over the rate window, by category.
    pub errors: ErrorCounts,
    pub bridge_status: BridgeStatus,
    pub degraded_reason: Option<String>,
}
