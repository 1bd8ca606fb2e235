//! Resource containment
//!
//! Watches [`ResourceSample`](crate::models::ResourceSample)s against
//! registered [`ContainmentProtocol`]s and, once a threshold breach has been
//! sustained long enough, isolates or throttles the heaviest workloads
//! through a host-supplied [`WorkloadController`].

mod manager;

pub use manager::{
    ActionRecord, ContainmentEvent, ContainmentManager, ContainmentStatus, IsolatedWorkload,
    ProtocolStatus,
};

use crate::error::HealerError;
use crate::models::{ResourceKind, WorkloadUsage};
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default cooldown between two triggers of the same protocol
pub const DEFAULT_CONTAINMENT_COOLDOWN: Duration = Duration::from_secs(300);

/// Containment step executed when a protocol triggers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainmentAction {
    Isolate,
    Deprioritize,
    Terminate,
    ScaleDown,
}

impl fmt::Display for ContainmentAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainmentAction::Isolate => write!(f, "isolate"),
            ContainmentAction::Deprioritize => write!(f, "deprioritize"),
            ContainmentAction::Terminate => write!(f, "terminate"),
            ContainmentAction::ScaleDown => write!(f, "scale_down"),
        }
    }
}

impl FromStr for ContainmentAction {
    type Err = HealerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "isolate" => Ok(ContainmentAction::Isolate),
            "deprioritize" => Ok(ContainmentAction::Deprioritize),
            "terminate" => Ok(ContainmentAction::Terminate),
            "scale_down" | "scaledown" => Ok(ContainmentAction::ScaleDown),
            other => Err(HealerError::Config(format!(
                "unknown containment action '{}'",
                other
            ))),
        }
    }
}

/// Condition under which a protocol triggers
#[derive(Debug, Clone, PartialEq)]
pub struct ContainmentTrigger {
    pub resource: ResourceKind,
    pub threshold_percent: f64,
    /// How long the breach must persist; zero triggers on the first breach
    pub sustained: Duration,
}

/// A threshold-triggered, cooldown-gated containment rule
#[derive(Debug, Clone)]
pub struct ContainmentProtocol {
    pub id: String,
    pub trigger: ContainmentTrigger,
    pub actions: Vec<ContainmentAction>,
    pub cooldown: Duration,
    /// Workloads acted on per trigger, heaviest first
    pub max_offenders: usize,
    /// Workloads terminated per trigger when termination is allowed
    pub terminate_limit: usize,
    pub allow_terminate: bool,
}

impl ContainmentProtocol {
    pub fn new(id: impl Into<String>, trigger: ContainmentTrigger, actions: Vec<ContainmentAction>) -> Self {
        Self {
            id: id.into(),
            trigger,
            actions,
            cooldown: DEFAULT_CONTAINMENT_COOLDOWN,
            max_offenders: 3,
            terminate_limit: 1,
            allow_terminate: false,
        }
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_max_offenders(mut self, max_offenders: usize) -> Self {
        self.max_offenders = max_offenders;
        self
    }

    /// Enable the terminate action for at most `limit` workloads per trigger
    pub fn allowing_terminate(mut self, limit: usize) -> Self {
        self.allow_terminate = true;
        self.terminate_limit = limit;
        self
    }

    pub fn validate(&self) -> Result<(), HealerError> {
        if self.id.is_empty() {
            return Err(HealerError::Config("containment protocol id is empty".into()));
        }
        let threshold = self.trigger.threshold_percent;
        if !(threshold > 0.0 && threshold <= 100.0) {
            return Err(HealerError::Config(format!(
                "containment protocol {}: threshold {} outside (0, 100]",
                self.id, threshold
            )));
        }
        if self.actions.is_empty() {
            return Err(HealerError::Config(format!(
                "containment protocol {} has no actions",
                self.id
            )));
        }
        Ok(())
    }
}

/// Host-supplied control over running workloads
#[async_trait]
pub trait WorkloadController: Send + Sync {
    async fn isolate(&self, workload: &WorkloadUsage) -> Result<()>;

    async fn release(&self, workload_id: &str) -> Result<()>;

    async fn deprioritize(&self, workload: &WorkloadUsage) -> Result<()>;

    async fn terminate(&self, workload: &WorkloadUsage) -> Result<()>;

    /// Signal an external scaler to shed load for `resource`
    async fn scale_down(&self, protocol_id: &str, resource: ResourceKind) -> Result<()>;

    /// Whether the workload is still running
    async fn workload_exists(&self, _workload_id: &str) -> bool {
        true
    }
}
