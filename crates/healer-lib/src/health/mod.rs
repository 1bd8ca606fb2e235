//! Component health tracking
//!
//! The [`HealthRegistry`] holds the current [`ComponentHealth`] of every
//! monitored component. It is written by the [`HealthMonitor`] after each
//! probe and by the healing executor's loop-escalation path.

mod monitor;
mod probe;


pub use monitor::{CycleOutcome, HealthMonitor, HealthMonitorConfig, INTEGRITY_METRIC, UPTIME_METRIC};
pub use probe::{Probe, ProbeOutcome};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Clears a cycle's running flag when the cycle ends or is dropped
pub(crate) struct CycleGuard<'a>(&'a AtomicBool);

impl<'a> CycleGuard<'a> {
    /// Set the flag, or `None` if it is already set
    pub(crate) fn try_acquire(running: &'a AtomicBool) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| CycleGuard(running))
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    Degraded,
    Critical,
    Failed,
    Unknown,
    Suppressed,
}

impl ComponentStatus {
    /// Statuses the healing executor acts on
    pub fn needs_healing(&self) -> bool {
        matches!(self, ComponentStatus::Critical | ComponentStatus::Suppressed)
    }

    /// Integrity score assumed when the probe does not report one
    pub fn default_integrity(&self) -> f64 {
        match self {
            ComponentStatus::Healthy => 100.0,
            ComponentStatus::Degraded | ComponentStatus::Unknown | ComponentStatus::Suppressed => 50.0,
            ComponentStatus::Critical | ComponentStatus::Failed => 0.0,
        }
    }
}

impl fmt::Display for ComponentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComponentStatus::Healthy => "healthy",
            ComponentStatus::Degraded => "degraded",
            ComponentStatus::Critical => "critical",
            ComponentStatus::Failed => "failed",
            ComponentStatus::Unknown => "unknown",
            ComponentStatus::Suppressed => "suppressed",
        };
        write!(f, "{}", s)
    }
}

/// Annotation left on a component whose remediation is looping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopSuppression {
    pub signature: String,
    pub count: usize,
    pub detected_at: i64,
    /// Identity of the degraded episode; the escalation timer only acts on
    /// the episode it was armed for
    pub episode: u64,
}

/// Current health of a single component
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: String,
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_probe_at: Option<i64>,
    /// Free-form metrics reported by the last probe
    #[serde(default)]
    pub metrics: HashMap<String, serde_json::Value>,
    /// Integrity score in `[0, 100]`
    pub integrity_score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_suppression: Option<LoopSuppression>,
}

impl ComponentHealth {
    /// Initial state before the first probe
    pub fn unknown(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            status: ComponentStatus::Unknown,
            last_probe_at: None,
            metrics: HashMap::new(),
            integrity_score: ComponentStatus::Unknown.default_integrity(),
            message: None,
            loop_suppression: None,
        }
    }

    /// The error string recorded in the metric bag, if any
    pub fn error(&self) -> Option<&str> {
        self.metrics.get("error").and_then(|v| v.as_str())
    }

    pub fn metric_f64(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).and_then(|v| v.as_f64())
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: Vec<ComponentHealth>,
}

impl HealthResponse {
    /// Worst-of rollup: any critical or failed component makes the whole
    /// system critical; anything not healthy makes it degraded
    pub fn compute_status(components: &[ComponentHealth]) -> ComponentStatus {
        let mut has_degraded = false;

        for health in components {
            match health.status {
                ComponentStatus::Critical | ComponentStatus::Failed => {
                    return ComponentStatus::Critical
                }
                ComponentStatus::Healthy => {}
                _ => has_degraded = true,
            }
        }

        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Registry of component health
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(RwLock::new(false)),
        }
    }

    /// Register a component with an unknown status
    pub async fn register(&self, component: &str) {
        let mut components = self.components.write().await;
        components
            .entry(component.to_string())
            .or_insert_with(|| ComponentHealth::unknown(component));
    }

    pub async fn get(&self, component: &str) -> Option<ComponentHealth> {
        self.components.read().await.get(component).cloned()
    }

    pub async fn status_of(&self, component: &str) -> Option<ComponentStatus> {
        self.components.read().await.get(component).map(|h| h.status)
    }

    /// Replace a component's health
    pub async fn update(&self, health: ComponentHealth) {
        let mut components = self.components.write().await;
        components.insert(health.component.clone(), health);
    }

    /// Apply `f` to a component's health in place
    pub async fn modify<T>(&self, component: &str, f: impl FnOnce(&mut ComponentHealth) -> T) -> Option<T> {
        let mut components = self.components.write().await;
        components.get_mut(component).map(f)
    }

    /// All components sorted by id
    pub async fn all(&self) -> Vec<ComponentHealth> {
        let mut all: Vec<ComponentHealth> = self.components.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.component.cmp(&b.component));
        all
    }

    pub async fn len(&self) -> usize {
        self.components.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.components.read().await.is_empty()
    }

    /// Mark a component degraded with a loop-suppression annotation
    pub async fn mark_loop_degraded(&self, component: &str, annotation: LoopSuppression) -> bool {
        self.modify(component, |health| {
            health.status = ComponentStatus::Degraded;
            health.integrity_score = health.integrity_score.min(ComponentStatus::Degraded.default_integrity());
            health.message = Some(format!(
                "healing suppressed: {} repeated {} times",
                annotation.signature, annotation.count
            ));
            health.loop_suppression = Some(annotation);
        })
        .await
        .is_some()
    }

    /// Move a component from its loop-degraded episode to failed
    ///
    /// Returns the previous health only if the component is still degraded
    /// for the given episode.
    pub async fn escalate_episode(&self, component: &str, episode: u64) -> Option<ComponentHealth> {
        let mut components = self.components.write().await;
        let health = components.get_mut(component)?;

        let same_episode = health
            .loop_suppression
            .as_ref()
            .map(|l| l.episode == episode)
            .unwrap_or(false);
        if health.status != ComponentStatus::Degraded || !same_episode {
            return None;
        }

        let previous = health.clone();
        health.status = ComponentStatus::Failed;
        health.integrity_score = 0.0;
        health.message = Some("remediation loop unresolved after grace period".to_string());
        Some(previous)
    }

    /// Move a component out of its unhealthy status after a completed
    /// remediation; the next probe re-establishes it
    pub async fn mark_remediated(&self, component: &str, detail: &str) -> bool {
        self.modify(component, |health| {
            if !health.status.needs_healing() {
                return false;
            }
            health.status = ComponentStatus::Unknown;
            health.integrity_score = health.integrity_score.max(ComponentStatus::Unknown.default_integrity());
            health.message = Some(format!("remediated ({}), awaiting probe", detail));
            true
        })
        .await
        .unwrap_or(false)
    }

    pub async fn set_ready(&self, ready: bool) {
        let mut r = self.ready.write().await;
        *r = ready;
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.all().await;
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Ready once the control plane has started; component health does not
    /// affect readiness since unhealthy components are what it is there for
    pub async fn readiness(&self) -> ReadinessResponse {
        if *self.ready.read().await {
            ReadinessResponse {
                ready: true,
                reason: None,
            }
        } else {
            ReadinessResponse {
                ready: false,
                reason: Some("Control plane not yet started".to_string()),
            }
        }
    }
}
