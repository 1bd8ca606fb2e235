//! Core data models shared across the control plane

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Generate a process-unique identifier with the given prefix
pub fn next_id(prefix: &str) -> String {
    format!("{}-{}", prefix, NEXT_ID.fetch_add(1, Ordering::Relaxed))
}

/// Current wall-clock time as a unix timestamp (seconds)
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Host resource sample produced by a [`crate::sampler::MetricsSource`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceSample {
    pub timestamp: i64,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub running_processes: u32,
    pub total_processes: u32,
    /// Heaviest workloads observed in this sample, highest CPU first
    #[serde(default)]
    pub workloads: Vec<WorkloadUsage>,
}

impl ResourceSample {
    /// Read the utilisation of the given resource, in percent
    pub fn usage(&self, resource: ResourceKind) -> f64 {
        match resource {
            ResourceKind::Cpu => self.cpu_percent,
            ResourceKind::Memory => self.memory_percent,
            ResourceKind::Processes => {
                if self.total_processes == 0 {
                    0.0
                } else {
                    self.running_processes as f64 / self.total_processes as f64 * 100.0
                }
            }
        }
    }
}

/// Resource usage of a single workload (process, container, ...)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkloadUsage {
    pub id: String,
    pub name: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

impl WorkloadUsage {
    pub fn usage(&self, resource: ResourceKind) -> f64 {
        match resource {
            ResourceKind::Cpu | ResourceKind::Processes => self.cpu_percent,
            ResourceKind::Memory => self.memory_percent,
        }
    }
}

/// Resource watched by a containment protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Cpu,
    Memory,
    Processes,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::Cpu => write!(f, "cpu"),
            ResourceKind::Memory => write!(f, "memory"),
            ResourceKind::Processes => write!(f, "processes"),
        }
    }
}

/// Anomaly classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    Performance,
    Connectivity,
    Resource,
    DataIntegrity,
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyType::Performance => write!(f, "performance"),
            AnomalyType::Connectivity => write!(f, "connectivity"),
            AnomalyType::Resource => write!(f, "resource"),
            AnomalyType::DataIntegrity => write!(f, "data_integrity"),
        }
    }
}

/// Anomaly severity levels, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A detected anomaly for a single component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub id: String,
    pub component: String,
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub description: String,
    pub detected_at: i64,
    pub resolved: bool,
}

impl AnomalyReport {
    pub fn new(
        component: impl Into<String>,
        anomaly_type: AnomalyType,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: next_id("anomaly"),
            component: component.into(),
            anomaly_type,
            severity,
            description: description.into(),
            detected_at: unix_now(),
            resolved: false,
        }
    }
}

/// Control-plane wide view of a component, read by the suppression engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GlobalState {
    Healthy,
    Failed,
    Suppressed,
}

impl fmt::Display for GlobalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GlobalState::Healthy => write!(f, "healthy"),
            GlobalState::Failed => write!(f, "failed"),
            GlobalState::Suppressed => write!(f, "suppressed"),
        }
    }
}

impl std::str::FromStr for GlobalState {
    type Err = crate::HealerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "healthy" => Ok(GlobalState::Healthy),
            "failed" => Ok(GlobalState::Failed),
            "suppressed" => Ok(GlobalState::Suppressed),
            other => Err(crate::HealerError::InvalidState(other.to_string())),
        }
    }
}

/// Remediation routine selected for a healing action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationType {
    RestartService,
    RebuildCache,
    RepairDatastore,
    RecoverData,
}

impl fmt::Display for RemediationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemediationType::RestartService => write!(f, "restart_service"),
            RemediationType::RebuildCache => write!(f, "rebuild_cache"),
            RemediationType::RepairDatastore => write!(f, "repair_datastore"),
            RemediationType::RecoverData => write!(f, "recover_data"),
        }
    }
}

/// Healing action lifecycle: `analyzing -> repairing -> {completed | failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Analyzing,
    Repairing,
    Completed,
    Failed,
}

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionStatus::Completed | ActionStatus::Failed)
    }
}

impl fmt::Display for ActionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionStatus::Analyzing => write!(f, "analyzing"),
            ActionStatus::Repairing => write!(f, "repairing"),
            ActionStatus::Completed => write!(f, "completed"),
            ActionStatus::Failed => write!(f, "failed"),
        }
    }
}
