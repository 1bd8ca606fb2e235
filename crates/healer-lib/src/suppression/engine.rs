//! Dependency-aware healing suppression
//!
//! Healing a component whose critical upstream has already failed treats a
//! symptom instead of the cause. The engine tracks the global state of every
//! component and withholds healing for such dependents.
//!
//! Failure propagation is single-hop: when a component fails, only its
//! direct dependents are suppressed. Components further down the chain are
//! suppressed lazily by `should_suppress` only if their own direct critical
//! dependency is failed.

use super::DependencyGraph;
use crate::error::HealerError;
use crate::models::{AnomalyType, GlobalState};
use crate::observability::{HealerMetrics, StructuredLogger};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;
use tracing::debug;

/// Components whose failure suppresses healing of their dependents
pub const DEFAULT_CRITICAL_COMPONENTS: &[&str] = &["datastore", "cache", "server"];

#[derive(Debug, Clone)]
pub struct SuppressionConfig {
    pub critical_components: HashSet<String>,
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            critical_components: DEFAULT_CRITICAL_COMPONENTS
                .iter()
                .map(|c| c.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Default)]
struct SuppressionState {
    states: HashMap<String, GlobalState>,
    reasons: HashMap<String, String>,
}

impl SuppressionState {
    fn state_of(&self, component: &str) -> GlobalState {
        self.states
            .get(component)
            .copied()
            .unwrap_or(GlobalState::Healthy)
    }

    fn suppressed_count(&self) -> i64 {
        self.states
            .values()
            .filter(|s| **s == GlobalState::Suppressed)
            .count() as i64
    }
}

/// Read-only view of the global state map
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuppressionSnapshot {
    pub states: BTreeMap<String, GlobalState>,
    pub reasons: BTreeMap<String, String>,
    pub dependencies: BTreeMap<String, Vec<String>>,
    pub critical_components: Vec<String>,
}

pub struct SuppressionEngine {
    graph: DependencyGraph,
    critical: HashSet<String>,
    state: RwLock<SuppressionState>,
    metrics: HealerMetrics,
    logger: StructuredLogger,
}

impl SuppressionEngine {
    pub fn new(
        graph: DependencyGraph,
        config: SuppressionConfig,
        metrics: HealerMetrics,
        logger: StructuredLogger,
    ) -> Self {
        let states = graph
            .components()
            .into_iter()
            .map(|c| (c, GlobalState::Healthy))
            .collect();
        Self {
            graph,
            critical: config.critical_components,
            state: RwLock::new(SuppressionState {
                states,
                reasons: HashMap::new(),
            }),
            metrics,
            logger,
        }
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn dependencies_of(&self, component: &str) -> &[String] {
        self.graph.dependencies_of(component)
    }

    pub fn is_critical(&self, component: &str) -> bool {
        self.critical.contains(component)
    }

    pub async fn state_of(&self, component: &str) -> GlobalState {
        self.state.read().await.state_of(component)
    }

    /// Decide whether healing for `component` must be withheld
    ///
    /// Returns the cause when suppressed. A component found to depend on a
    /// failed critical component is itself marked suppressed; later calls
    /// return the stored cause without logging again.
    pub async fn should_suppress(&self, component: &str, anomaly_type: AnomalyType) -> Option<String> {
        {
            let state = self.state.read().await;
            if state.state_of(component) == GlobalState::Suppressed {
                return Some(
                    state
                        .reasons
                        .get(component)
                        .cloned()
                        .unwrap_or_else(|| format!("{} is suppressed", component)),
                );
            }
        }

        let mut state = self.state.write().await;
        let upstream = self
            .graph
            .dependencies_of(component)
            .iter()
            .find(|dep| self.critical.contains(*dep) && state.state_of(dep) == GlobalState::Failed)?
            .clone();

        let reason = format!(
            "critical dependency {} of {} has failed; {} healing withheld",
            upstream, component, anomaly_type
        );
        state
            .states
            .insert(component.to_string(), GlobalState::Suppressed);
        state.reasons.insert(component.to_string(), reason.clone());
        self.metrics.set_suppressed_components(state.suppressed_count());
        self.logger.log_suppression(component, &upstream, &reason);

        Some(reason)
    }

    /// Mark `component` failed and suppress its direct dependents
    ///
    /// Returns the dependents newly moved to suppressed.
    pub async fn notify_failure(&self, component: &str) -> Result<Vec<String>, HealerError> {
        if !self.graph.contains(component) {
            return Err(HealerError::UnknownComponent(component.to_string()));
        }

        let mut state = self.state.write().await;
        state
            .states
            .insert(component.to_string(), GlobalState::Failed);
        state.reasons.remove(component);

        let mut suppressed = Vec::new();
        for dependent in self.graph.dependents_of(component) {
            match state.state_of(&dependent) {
                GlobalState::Failed | GlobalState::Suppressed => continue,
                GlobalState::Healthy => {}
            }
            let reason = format!("upstream {} failed; {} healing withheld", component, dependent);
            state
                .states
                .insert(dependent.clone(), GlobalState::Suppressed);
            state.reasons.insert(dependent.clone(), reason.clone());
            self.logger.log_suppression(&dependent, component, &reason);
            suppressed.push(dependent);
        }

        self.metrics.set_suppressed_components(state.suppressed_count());
        Ok(suppressed)
    }

    /// Record a healthy outcome for `component`
    pub async fn mark_healthy(&self, component: &str) {
        let mut state = self.state.write().await;
        if state.state_of(component) != GlobalState::Healthy {
            debug!(component = %component, "Global state back to healthy");
        }
        state
            .states
            .insert(component.to_string(), GlobalState::Healthy);
        state.reasons.remove(component);
        self.metrics.set_suppressed_components(state.suppressed_count());
    }

    /// Administrative override of a component's global state
    ///
    /// Returns the previous state.
    pub async fn override_state(
        &self,
        component: &str,
        new_state: GlobalState,
    ) -> Result<GlobalState, HealerError> {
        if !self.graph.contains(component) {
            return Err(HealerError::UnknownComponent(component.to_string()));
        }

        let mut state = self.state.write().await;
        let previous = state.state_of(component);
        state.states.insert(component.to_string(), new_state);
        if new_state == GlobalState::Suppressed {
            state
                .reasons
                .insert(component.to_string(), "suppressed by operator override".to_string());
        } else {
            state.reasons.remove(component);
        }
        self.metrics.set_suppressed_components(state.suppressed_count());
        self.logger
            .log_override(component, &previous.to_string(), &new_state.to_string());

        Ok(previous)
    }

    /// Put a component back to a previously observed state without logging
    pub(crate) async fn restore(&self, component: &str, previous: GlobalState, reason: Option<String>) {
        if !self.graph.contains(component) {
            return;
        }
        let mut state = self.state.write().await;
        state.states.insert(component.to_string(), previous);
        match reason {
            Some(reason) => state.reasons.insert(component.to_string(), reason),
            None => state.reasons.remove(component),
        };
        self.metrics.set_suppressed_components(state.suppressed_count());
    }

    pub async fn reason_for(&self, component: &str) -> Option<String> {
        self.state.read().await.reasons.get(component).cloned()
    }

    pub async fn snapshot(&self) -> SuppressionSnapshot {
        let state = self.state.read().await;
        let mut critical: Vec<String> = self.critical.iter().cloned().collect();
        critical.sort();
        SuppressionSnapshot {
            states: state
                .states
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
            reasons: state
                .reasons
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            dependencies: self.graph.to_map(),
            critical_components: critical,
        }
    }
}
