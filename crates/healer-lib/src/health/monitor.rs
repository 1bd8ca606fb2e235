//! Health monitor and anomaly detector
//!
//! Two cadences share the probe registry:
//! - a frequent shallow cycle probing a capped, round-robin subset of
//!   components
//! - a rarer deep cycle probing every component with its deep probe
//!
//! After probing, fixed anomaly rules are evaluated for each probed
//! component. Anomalies are withheld for components the suppression engine
//! says depend on a failed critical component.

use super::{ComponentHealth, ComponentStatus, CycleGuard, HealthRegistry, Probe, ProbeOutcome};
use crate::anomaly::AnomalyStore;
use crate::error::HealerError;
use crate::healing::EscalationTimers;
use crate::models::{unix_now, AnomalyReport, AnomalyType, Severity};
use crate::observability::{HealerMetrics, StructuredLogger};
use crate::suppression::SuppressionEngine;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info};

/// Metric key carrying the component's uptime in seconds
pub const UPTIME_METRIC: &str = "uptime_secs";

/// Metric key carrying a probe-reported integrity score
pub const INTEGRITY_METRIC: &str = "integrity_score";

/// Configuration for the health monitor
#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    /// Minimum time between shallow cycle starts (default: 15 seconds)
    pub probe_interval: Duration,
    /// Minimum time between deep cycle starts (default: 5 minutes)
    pub deep_probe_interval: Duration,
    /// Components probed per shallow cycle
    pub max_components_per_cycle: usize,
    pub probe_timeout: Duration,
    pub deep_probe_timeout: Duration,
    /// Uptime below this raises a performance anomaly
    pub min_uptime: Duration,
    /// Any `*_percent` metric above this raises a resource anomaly
    pub resource_threshold_percent: f64,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(15),
            deep_probe_interval: Duration::from_secs(300),
            max_components_per_cycle: 8,
            probe_timeout: Duration::from_secs(5),
            deep_probe_timeout: Duration::from_secs(30),
            min_uptime: Duration::from_secs(60),
            resource_threshold_percent: 90.0,
        }
    }
}

/// Result of a monitor cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed { probed: usize, anomalies: usize },
    /// The previous cycle of the same kind is still running
    SkippedRunning,
    /// The cycle interval has not elapsed since the last start
    SkippedCooldown,
}

/// Clears a cycle's running flag when dropped
enum Observation {
    Outcome(ProbeOutcome),
    /// The probe errored or timed out
    Failed { error: String, timed_out: bool },
}

struct Candidate {
    anomaly_type: AnomalyType,
    severity: Severity,
    description: String,
}

pub struct HealthMonitor {
    config: HealthMonitorConfig,
    registry: HealthRegistry,
    anomalies: Arc<AnomalyStore>,
    suppression: Arc<SuppressionEngine>,
    escalations: Arc<EscalationTimers>,
    probes: RwLock<Vec<(String, Arc<dyn Probe>)>>,
    cursor: AtomicUsize,
    shallow_running: AtomicBool,
    deep_running: AtomicBool,
    last_shallow: Mutex<Option<Instant>>,
    last_deep: Mutex<Option<Instant>>,
    metrics: HealerMetrics,
    logger: StructuredLogger,
}

impl HealthMonitor {
    pub fn new(
        config: HealthMonitorConfig,
        registry: HealthRegistry,
        anomalies: Arc<AnomalyStore>,
        suppression: Arc<SuppressionEngine>,
        escalations: Arc<EscalationTimers>,
        metrics: HealerMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            config,
            registry,
            anomalies,
            suppression,
            escalations,
            probes: RwLock::new(Vec::new()),
            cursor: AtomicUsize::new(0),
            shallow_running: AtomicBool::new(false),
            deep_running: AtomicBool::new(false),
            last_shallow: Mutex::new(None),
            last_deep: Mutex::new(None),
            metrics,
            logger,
        }
    }

    pub fn config(&self) -> &HealthMonitorConfig {
        &self.config
    }

    /// Register (or replace) the probe for a component
    pub async fn register(&self, component: &str, probe: Arc<dyn Probe>) {
        {
            let mut probes = self.probes.write().await;
            match probes.iter_mut().find(|(id, _)| id == component) {
                Some(entry) => entry.1 = probe,
                None => probes.push((component.to_string(), probe)),
            }
        }
        self.registry.register(component).await;
    }

    pub async fn components(&self) -> Vec<String> {
        self.probes
            .read()
            .await
            .iter()
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Probe the next capped subset of components
    pub async fn run_shallow_cycle(&self) -> CycleOutcome {
        let _guard = match self
            .begin(&self.shallow_running, &self.last_shallow, self.config.probe_interval)
            .await
        {
            Ok(guard) => guard,
            Err(skipped) => return skipped,
        };

        let batch = self.next_batch().await;
        let mut probed = Vec::with_capacity(batch.len());
        for (id, probe) in batch {
            self.probe_component(&id, probe, false).await;
            probed.push(id);
        }

        let mut anomalies = 0;
        for id in &probed {
            anomalies += self.evaluate(id).await;
        }

        debug!(probed = probed.len(), anomalies = anomalies, "Shallow health cycle complete");
        CycleOutcome::Completed {
            probed: probed.len(),
            anomalies,
        }
    }

    /// Deep-probe every component and drop stale resolved anomalies
    pub async fn run_deep_cycle(&self) -> CycleOutcome {
        let _guard = match self
            .begin(&self.deep_running, &self.last_deep, self.config.deep_probe_interval)
            .await
        {
            Ok(guard) => guard,
            Err(skipped) => return skipped,
        };

        let all: Vec<(String, Arc<dyn Probe>)> = self.probes.read().await.clone();
        for (id, probe) in &all {
            self.probe_component(id, probe.clone(), true).await;
        }

        let mut anomalies = 0;
        for (id, _) in &all {
            anomalies += self.evaluate(id).await;
        }

        let evicted = self.anomalies.evict_resolved().await;
        info!(
            probed = all.len(),
            anomalies = anomalies,
            evicted = evicted,
            "Deep health cycle complete"
        );
        CycleOutcome::Completed {
            probed: all.len(),
            anomalies,
        }
    }

    async fn begin<'a>(
        &self,
        running: &'a AtomicBool,
        last_start: &Mutex<Option<Instant>>,
        interval: Duration,
    ) -> Result<CycleGuard<'a>, CycleOutcome> {
        let Some(guard) = CycleGuard::try_acquire(running) else {
            debug!("Previous cycle still running, skipping");
            return Err(CycleOutcome::SkippedRunning);
        };

        let now = Instant::now();
        let mut last = last_start.lock().await;
        if let Some(previous) = *last {
            if now.duration_since(previous) < interval {
                return Err(CycleOutcome::SkippedCooldown);
            }
        }
        *last = Some(now);
        Ok(guard)
    }

    /// Next round-robin slice of the probe list
    async fn next_batch(&self) -> Vec<(String, Arc<dyn Probe>)> {
        let probes = self.probes.read().await;
        if probes.is_empty() {
            return Vec::new();
        }
        let count = self.config.max_components_per_cycle.clamp(1, probes.len());
        let start = self.cursor.fetch_add(count, Ordering::SeqCst) % probes.len();
        (0..count)
            .map(|i| probes[(start + i) % probes.len()].clone())
            .collect()
    }

    async fn probe_component(&self, component: &str, probe: Arc<dyn Probe>, deep: bool) {
        let limit = if deep {
            self.config.deep_probe_timeout
        } else {
            self.config.probe_timeout
        };

        let started = Instant::now();
        let result = tokio::time::timeout(limit, async {
            if deep {
                probe.deep_probe().await
            } else {
                probe.probe().await
            }
        })
        .await;
        self.metrics
            .observe_probe_latency(started.elapsed().as_secs_f64());

        let observation = match result {
            Ok(Ok(outcome)) => Observation::Outcome(outcome),
            Ok(Err(e)) => Observation::Failed {
                error: format!("{:#}", e),
                timed_out: false,
            },
            Err(_) => Observation::Failed {
                error: HealerError::ProbeTimeout {
                    component: component.to_string(),
                    timeout: limit,
                }
                .to_string(),
                timed_out: true,
            },
        };

        self.apply(component, observation).await;
    }

    /// Fold a probe observation into the component's stored health
    async fn apply(&self, component: &str, observation: Observation) {
        let mut health = self
            .registry
            .get(component)
            .await
            .unwrap_or_else(|| ComponentHealth::unknown(component));
        let previous = health.status;
        health.last_probe_at = Some(unix_now());

        // Loop-degraded and failed components keep their status while
        // probes keep failing
        let sticky = match previous {
            ComponentStatus::Failed => Some(ComponentStatus::Failed),
            ComponentStatus::Degraded if health.loop_suppression.is_some() => {
                Some(ComponentStatus::Degraded)
            }
            _ => None,
        };

        match observation {
            Observation::Outcome(outcome) if outcome.healthy => {
                health.status = ComponentStatus::Healthy;
                health.metrics = outcome.metrics;
                health.message = None;
                if health.loop_suppression.take().is_some() {
                    self.escalations.cancel(component).await;
                    info!(component = %component, "Component recovered, loop suppression cleared");
                }
            }
            Observation::Outcome(outcome) => {
                let error = outcome
                    .error
                    .unwrap_or_else(|| "probe reported unhealthy".to_string());
                health.metrics = outcome.metrics;
                health.metrics.insert("error".to_string(), json!(error));
                health.message = Some(error);
                health.status = sticky.unwrap_or(ComponentStatus::Critical);
            }
            Observation::Failed { error, timed_out } => {
                let mut metrics = HashMap::new();
                metrics.insert("error".to_string(), json!(error));
                metrics.insert("timeout".to_string(), json!(timed_out));
                health.metrics = metrics;
                health.message = Some(error);
                health.status = sticky.unwrap_or(ComponentStatus::Unknown);
            }
        }

        health.integrity_score = health
            .metric_f64(INTEGRITY_METRIC)
            .map(|score| score.clamp(0.0, 100.0))
            .unwrap_or_else(|| health.status.default_integrity());

        if health.status != previous {
            debug!(
                component = %component,
                from = %previous,
                to = %health.status,
                "Component status changed"
            );
        }
        self.registry.update(health).await;
    }

    /// Evaluate anomaly rules for a component, returning reports recorded
    async fn evaluate(&self, component: &str) -> usize {
        let Some(health) = self.registry.get(component).await else {
            return 0;
        };

        let candidates = self.candidates(&health).await;
        let unhealthy = health.status == ComponentStatus::Critical;

        if unhealthy || !candidates.is_empty() {
            let anomaly_type = candidates
                .first()
                .map(|c| c.anomaly_type)
                .unwrap_or(AnomalyType::Connectivity);
            if let Some(reason) = self.suppression.should_suppress(component, anomaly_type).await {
                if unhealthy {
                    self.registry
                        .modify(component, |h| {
                            h.status = ComponentStatus::Suppressed;
                            h.integrity_score = h.integrity_score.max(ComponentStatus::Suppressed.default_integrity());
                            h.message = Some(reason.clone());
                        })
                        .await;
                }
                debug!(component = %component, reason = %reason, "Anomaly evaluation suppressed");
                return 0;
            }
        }

        if health.status == ComponentStatus::Healthy {
            let raised: Vec<AnomalyType> = candidates.iter().map(|c| c.anomaly_type).collect();
            self.anomalies
                .resolve_component_except(component, &raised)
                .await;
        }

        let mut recorded = 0;
        for candidate in candidates {
            let report = AnomalyReport::new(
                component,
                candidate.anomaly_type,
                candidate.severity,
                candidate.description,
            );
            let (anomaly_type, severity, description) = (
                report.anomaly_type.to_string(),
                report.severity.to_string(),
                report.description.clone(),
            );
            if self.anomalies.record(report).await {
                self.metrics.inc_anomalies(&anomaly_type);
                self.logger
                    .log_anomaly(component, &anomaly_type, &severity, &description);
                recorded += 1;
            }
        }
        recorded
    }

    /// Anomalies the fixed rules raise for `health`, at most one per type
    async fn candidates(&self, health: &ComponentHealth) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = Vec::new();
        let mut push = |candidate: Candidate| {
            if !candidates
                .iter()
                .any(|c| c.anomaly_type == candidate.anomaly_type)
            {
                candidates.push(candidate);
            }
        };

        if health.status == ComponentStatus::Critical {
            push(Candidate {
                anomaly_type: AnomalyType::Connectivity,
                severity: Severity::Critical,
                description: format!(
                    "probe reported unhealthy: {}",
                    health.error().unwrap_or("no detail")
                ),
            });
        }

        if let Some(uptime) = health.metric_f64(UPTIME_METRIC) {
            let min = self.config.min_uptime.as_secs_f64();
            if uptime < min {
                push(Candidate {
                    anomaly_type: AnomalyType::Performance,
                    severity: Severity::Medium,
                    description: format!("uptime {:.0}s below {:.0}s, recent restart", uptime, min),
                });
            }
        }

        for dep in self.suppression.dependencies_of(&health.component) {
            if self.registry.status_of(dep).await == Some(ComponentStatus::Critical) {
                push(Candidate {
                    anomaly_type: AnomalyType::Connectivity,
                    severity: Severity::High,
                    description: format!("dependency {} is critical", dep),
                });
            }
        }

        let threshold = self.config.resource_threshold_percent;
        let mut over: Vec<(&String, f64)> = health
            .metrics
            .iter()
            .filter(|(key, _)| key.ends_with("_percent"))
            .filter_map(|(key, value)| value.as_f64().map(|v| (key, v)))
            .filter(|(_, v)| *v > threshold)
            .collect();
        over.sort_by(|a, b| a.0.cmp(b.0));
        if !over.is_empty() {
            let detail: Vec<String> = over
                .iter()
                .map(|(key, v)| format!("{} at {:.1}%", key, v))
                .collect();
            push(Candidate {
                anomaly_type: AnomalyType::Resource,
                severity: Severity::High,
                description: format!("{} above {:.0}%", detail.join(", "), threshold),
            });
        }

        candidates
    }
}
