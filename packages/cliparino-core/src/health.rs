//! Component health tracking and repair-action history.
//!
//! Every supervisor reports its status here. The reporter keeps, per named
//! component, the current status, the last error, and a bounded ring of
//! repair actions ("reconnected", "drift detected: Width", ...) so the tray
//! UI and logs can answer "what has the process been doing to stay alive".

use std::collections::VecDeque;

use dashmap::DashMap;
use serde::Serialize;

use crate::utils::now_millis;

/// Maximum repair-action entries kept per component (oldest dropped).
const REPAIR_RING_CAPACITY: usize = 20;

/// Well-known component names used across the supervisors.
///
/// Constants rather than free strings so health keys cannot drift apart
/// between the reporter and its callers.
pub mod component {
    /// The obs-websocket connection and desired-state supervisor.
    pub const OBS: &str = "obs";
    /// The Twitch event intake (EventSub or IRC).
    pub const TWITCH_EVENTS: &str = "twitch-events";
    /// The Twitch Helix REST client.
    pub const TWITCH_HELIX: &str = "twitch-helix";
    /// The playback engine.
    pub const PLAYBACK: &str = "playback";
}

/// Health status of a single component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum HealthStatus {
    /// Operating normally.
    Healthy,
    /// Operating with reduced capability (e.g. fallback transport).
    Degraded,
    /// Not operating.
    Unhealthy,
    /// No report received yet.
    #[default]
    Unknown,
}

impl HealthStatus {
    /// Short lowercase label for log lines and repair entries.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Unknown => "unknown",
        }
    }
}

/// A single timestamped repair-action entry.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairEntry {
    /// Unix timestamp in milliseconds.
    pub timestamp: u64,
    /// Human-readable action description.
    pub action: String,
}

/// Health record for one named component.
#[derive(Debug, Clone, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    /// Current status.
    pub status: HealthStatus,
    /// Unix timestamp (ms) of the last status report.
    pub last_check: u64,
    /// Last reported error, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Bounded history of repair actions (newest last).
    pub repairs: VecDeque<RepairEntry>,
}

impl ComponentHealth {
    fn push_repair(&mut self, action: String) {
        if self.repairs.len() >= REPAIR_RING_CAPACITY {
            self.repairs.pop_front();
        }
        self.repairs.push_back(RepairEntry {
            timestamp: now_millis(),
            action,
        });
    }
}

/// Thread-safe registry of component health, shared via `Arc`.
///
/// Keyed per component so concurrent supervisors never contend on each
/// other's entries.
#[derive(Debug, Default)]
pub struct HealthReporter {
    components: DashMap<String, ComponentHealth>,
}

impl HealthReporter {
    /// Creates an empty reporter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports the current status of a component, overwriting the previous one.
    ///
    /// A non-healthy report appends a `status=<s>: <error>` repair entry; a
    /// healthy report appends `recovered` when the component was previously
    /// degraded or unhealthy (steady healthy reports don't flood the ring).
    pub fn report(&self, component: &str, status: HealthStatus, error: Option<&str>) {
        let mut entry = self.components.entry(component.to_string()).or_default();

        let was = entry.status;
        entry.status = status;
        entry.last_check = now_millis();
        entry.last_error = error.map(str::to_string);

        match status {
            HealthStatus::Healthy => {
                if matches!(was, HealthStatus::Degraded | HealthStatus::Unhealthy) {
                    entry.push_repair("recovered".to_string());
                }
            }
            HealthStatus::Degraded | HealthStatus::Unhealthy => {
                let detail = error.unwrap_or("no detail");
                entry.push_repair(format!("status={}: {}", status.label(), detail));
            }
            HealthStatus::Unknown => {}
        }

        log::debug!(
            "[Health] {} -> {}{}",
            component,
            status.label(),
            error.map(|e| format!(" ({e})")).unwrap_or_default()
        );
    }

    /// Appends a repair action to a component's ring without touching status.
    pub fn record_repair(&self, component: &str, action: &str) {
        let mut entry = self.components.entry(component.to_string()).or_default();
        entry.push_repair(action.to_string());
        log::info!("[Health] {} repair: {}", component, action);
    }

    /// Returns a snapshot of one component's health.
    #[must_use]
    pub fn component(&self, component: &str) -> Option<ComponentHealth> {
        self.components.get(component).map(|r| r.value().clone())
    }

    /// Returns a snapshot of all components.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, ComponentHealth)> {
        self.components
            .iter()
            .map(|r| (r.key().clone(), r.value().clone()))
            .collect()
    }

    /// Aggregates all component statuses into one.
    ///
    /// Unhealthy dominates, then Degraded, then Healthy; Unknown only when no
    /// component has reported anything else.
    #[must_use]
    pub fn aggregate(&self) -> HealthStatus {
        let mut saw_degraded = false;
        let mut saw_healthy = false;
        for entry in self.components.iter() {
            match entry.value().status {
                HealthStatus::Unhealthy => return HealthStatus::Unhealthy,
                HealthStatus::Degraded => saw_degraded = true,
                HealthStatus::Healthy => saw_healthy = true,
                HealthStatus::Unknown => {}
            }
        }
        if saw_degraded {
            HealthStatus::Degraded
        } else if saw_healthy {
            HealthStatus::Healthy
        } else {
            HealthStatus::Unknown
        }
    }
}
