//! Control plane assembly
//!
//! [`ControlPlaneBuilder`] collects the host collaborators (probes, the
//! remediator, the metrics source and the workload controller) and wires them
//! into one [`ControlPlane`]. Starting the control plane registers the
//! built-in `health-probe`, `health-deep-probe` and `healing-evaluation` jobs
//! with the orchestrator and spawns the sampler and containment loops.

use crate::anomaly::{AnomalyStore, AnomalyStoreConfig};
use crate::containment::{ContainmentManager, ContainmentProtocol, ContainmentStatus, WorkloadController};
use crate::error::HealerError;
use crate::healing::{EscalationTimers, HealingAction, HealingConfig, HealingExecutor, Remediator};
use crate::health::{
    ComponentHealth, ComponentStatus, CycleOutcome, HealthMonitor, HealthMonitorConfig,
    HealthRegistry, HealthResponse, Probe, ReadinessResponse,
};
use crate::models::{AnomalyReport, GlobalState, ResourceSample};
use crate::observability::{HealerMetrics, StructuredLogger};
use crate::orchestrator::{
    job_fn, CircuitBreakerConfig, OrchestratorStatus, Recurrence, ScheduledTask, TaskOrchestrator,
};
use crate::sampler::{MetricsSource, ProcMetricsSource, SampleHistory, SamplerConfig, SamplerLoop};
use crate::suppression::{DependencyGraph, SuppressionConfig, SuppressionEngine, SuppressionSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub const HEALTH_PROBE_TASK: &str = "health-probe";
pub const HEALTH_DEEP_PROBE_TASK: &str = "health-deep-probe";
pub const HEALING_EVALUATION_TASK: &str = "healing-evaluation";

/// Actions included in a status report
const STATUS_RECENT_ACTIONS: usize = 20;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Configuration for the whole control plane
#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    pub node_name: String,
    pub health: HealthMonitorConfig,
    pub healing: HealingConfig,
    pub suppression: SuppressionConfig,
    pub sampler: SamplerConfig,
    pub anomalies: AnomalyStoreConfig,
    /// Interval of the healing evaluation job (default: 30 seconds)
    pub healing_interval: Duration,
    /// Breaker applied to the built-in jobs
    pub task_breaker: CircuitBreakerConfig,
    /// Deep probes are skipped while the trailing CPU average exceeds this
    pub deep_probe_max_cpu_percent: Option<f64>,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            node_name: "healer".to_string(),
            health: HealthMonitorConfig::default(),
            healing: HealingConfig::default(),
            suppression: SuppressionConfig::default(),
            sampler: SamplerConfig::default(),
            anomalies: AnomalyStoreConfig::default(),
            healing_interval: Duration::from_secs(30),
            task_breaker: CircuitBreakerConfig::default(),
            deep_probe_max_cpu_percent: Some(80.0),
        }
    }
}

/// Everything an operator needs in one document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub node: String,
    pub version: String,
    pub ready: bool,
    pub overall: ComponentStatus,
    pub components: Vec<ComponentHealth>,
    pub unresolved_anomalies: Vec<AnomalyReport>,
    pub recent_actions: Vec<HealingAction>,
    pub pending_escalations: Vec<String>,
    pub orchestrator: OrchestratorStatus,
    pub suppression: SuppressionSnapshot,
    pub containment: ContainmentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_sample: Option<ResourceSample>,
}

/// Builder for [`ControlPlane`]
pub struct ControlPlaneBuilder {
    config: ControlPlaneConfig,
    graph: DependencyGraph,
    probes: Vec<(String, Arc<dyn Probe>)>,
    remediator: Option<Arc<dyn Remediator>>,
    metrics_source: Option<Arc<dyn MetricsSource>>,
    workload_controller: Option<Arc<dyn WorkloadController>>,
    protocols: Vec<ContainmentProtocol>,
    tasks: Vec<ScheduledTask>,
}

impl ControlPlaneBuilder {
    pub fn new(config: ControlPlaneConfig) -> Self {
        Self {
            config,
            graph: DependencyGraph::new(),
            probes: Vec::new(),
            remediator: None,
            metrics_source: None,
            workload_controller: None,
            protocols: Vec::new(),
            tasks: Vec::new(),
        }
    }

    /// Add a monitored component with its probe and direct dependencies
    pub fn component(mut self, id: &str, probe: Arc<dyn Probe>, depends_on: &[&str]) -> Self {
        self.graph.add(id, depends_on.iter().map(|d| d.to_string()).collect());
        self.probes.push((id.to_string(), probe));
        self
    }

    pub fn remediator(mut self, remediator: Arc<dyn Remediator>) -> Self {
        self.remediator = Some(remediator);
        self
    }

    /// Host metrics source; defaults to reading `/proc`
    pub fn metrics_source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.metrics_source = Some(source);
        self
    }

    pub fn workload_controller(mut self, controller: Arc<dyn WorkloadController>) -> Self {
        self.workload_controller = Some(controller);
        self
    }

    pub fn containment_protocol(mut self, protocol: ContainmentProtocol) -> Self {
        self.protocols.push(protocol);
        self
    }

    /// Additional job scheduled alongside the built-in ones
    pub fn task(mut self, task: ScheduledTask) -> Self {
        self.tasks.push(task);
        self
    }

    pub async fn build(self) -> Result<ControlPlane, HealerError> {
        self.graph.validate()?;
        let remediator = self
            .remediator
            .ok_or_else(|| HealerError::Config("no remediator configured".to_string()))?;
        if !self.protocols.is_empty() && self.workload_controller.is_none() {
            return Err(HealerError::Config(
                "containment protocols require a workload controller".to_string(),
            ));
        }
        for task in &self.tasks {
            if matches!(
                task.id.as_str(),
                HEALTH_PROBE_TASK | HEALTH_DEEP_PROBE_TASK | HEALING_EVALUATION_TASK
            ) {
                return Err(HealerError::Config(format!("task id {} is reserved", task.id)));
            }
        }

        let config = self.config;
        let metrics = HealerMetrics::new();
        let logger = StructuredLogger::new(config.node_name.clone());

        let registry = HealthRegistry::new();
        let anomalies = Arc::new(AnomalyStore::new(config.anomalies.clone()));
        let escalations = Arc::new(EscalationTimers::new());
        let suppression = Arc::new(SuppressionEngine::new(
            self.graph,
            config.suppression.clone(),
            metrics.clone(),
            logger.clone(),
        ));

        let monitor = Arc::new(HealthMonitor::new(
            config.health.clone(),
            registry.clone(),
            anomalies.clone(),
            suppression.clone(),
            escalations.clone(),
            metrics.clone(),
            logger.clone(),
        ));
        for (id, probe) in self.probes {
            monitor.register(&id, probe).await;
        }

        let executor = Arc::new(HealingExecutor::new(
            config.healing.clone(),
            registry.clone(),
            anomalies.clone(),
            suppression.clone(),
            remediator,
            escalations,
            metrics.clone(),
            logger.clone(),
        ));

        let source = self
            .metrics_source
            .unwrap_or_else(|| Arc::new(ProcMetricsSource::new()) as Arc<dyn MetricsSource>);
        let history = Arc::new(SampleHistory::new(config.sampler.history_size));
        let sampler = Arc::new(SamplerLoop::new(
            source,
            history.clone(),
            config.sampler.clone(),
            metrics.clone(),
        ));
        let orchestrator = Arc::new(TaskOrchestrator::new(history, metrics.clone(), logger.clone()));

        let containment = match self.workload_controller {
            Some(controller) => {
                let manager = Arc::new(ContainmentManager::new(
                    controller,
                    metrics.clone(),
                    logger.clone(),
                ));
                for protocol in self.protocols {
                    manager.register(protocol).await?;
                }
                Some(manager)
            }
            None => None,
        };

        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(ControlPlane {
            config,
            registry,
            anomalies,
            suppression,
            monitor,
            executor,
            orchestrator,
            sampler,
            containment,
            extra_tasks: Mutex::new(self.tasks),
            shutdown_tx,
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            metrics,
            logger,
        })
    }
}

pub struct ControlPlane {
    config: ControlPlaneConfig,
    registry: HealthRegistry,
    anomalies: Arc<AnomalyStore>,
    suppression: Arc<SuppressionEngine>,
    monitor: Arc<HealthMonitor>,
    executor: Arc<HealingExecutor>,
    orchestrator: Arc<TaskOrchestrator>,
    sampler: Arc<SamplerLoop>,
    containment: Option<Arc<ContainmentManager>>,
    extra_tasks: Mutex<Vec<ScheduledTask>>,
    shutdown_tx: broadcast::Sender<()>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    stopped: AtomicBool,
    metrics: HealerMetrics,
    logger: StructuredLogger,
}

impl ControlPlane {
    pub fn builder(config: ControlPlaneConfig) -> ControlPlaneBuilder {
        ControlPlaneBuilder::new(config)
    }

    /// Register the built-in jobs, start scheduling and spawn the sampler
    /// and containment loops; later calls are no-ops
    pub async fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        for task in self.builtin_tasks() {
            self.orchestrator.register_task(task).await;
        }
        for task in self.extra_tasks.lock().await.drain(..) {
            self.orchestrator.register_task(task).await;
        }
        self.orchestrator.start().await;

        let mut handles = self.handles.lock().await;
        if let Some(containment) = &self.containment {
            // Subscribe before the sampler runs so the first sample is seen
            let samples = self.sampler.subscribe();
            handles.push(tokio::spawn(
                containment
                    .clone()
                    .run(samples, self.shutdown_tx.subscribe()),
            ));
        }
        handles.push(tokio::spawn(
            self.sampler.clone().run(self.shutdown_tx.subscribe()),
        ));
        drop(handles);

        self.registry.set_ready(true).await;
        let components = self.monitor.components().await.len();
        self.logger.log_startup(VERSION, components);
        info!(components = components, "Control plane started");
    }

    fn builtin_tasks(&self) -> Vec<ScheduledTask> {
        let monitor = self.monitor.clone();
        let probe = ScheduledTask::new(
            HEALTH_PROBE_TASK,
            Recurrence::every(self.config.health.probe_interval),
            job_fn(move || {
                let monitor = monitor.clone();
                async move {
                    monitor.run_shallow_cycle().await;
                    Ok::<(), anyhow::Error>(())
                }
            }),
        )
        .with_name("Shallow health probes")
        .with_priority(100)
        .with_breaker(self.config.task_breaker);

        let monitor = self.monitor.clone();
        let mut deep_probe = ScheduledTask::new(
            HEALTH_DEEP_PROBE_TASK,
            Recurrence::every(self.config.health.deep_probe_interval),
            job_fn(move || {
                let monitor = monitor.clone();
                async move {
                    monitor.run_deep_cycle().await;
                    Ok::<(), anyhow::Error>(())
                }
            }),
        )
        .with_name("Deep health probes")
        .with_priority(50)
        .with_breaker(self.config.task_breaker);
        if let Some(max_cpu) = self.config.deep_probe_max_cpu_percent {
            deep_probe = deep_probe.with_lazy(max_cpu);
        }

        let executor = self.executor.clone();
        let healing = ScheduledTask::new(
            HEALING_EVALUATION_TASK,
            Recurrence::every(self.config.healing_interval),
            job_fn(move || {
                let executor = executor.clone();
                async move {
                    executor.run_cycle().await;
                    Ok::<(), anyhow::Error>(())
                }
            }),
        )
        .with_name("Healing evaluation")
        .with_priority(90)
        .with_breaker(self.config.task_breaker);

        vec![probe, deep_probe, healing]
    }

    /// Stop every loop, cancel escalations and release isolated workloads;
    /// safe to call more than once
    pub async fn shutdown(&self, reason: &str) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        self.registry.set_ready(false).await;
        self.orchestrator.shutdown().await;
        self.executor.shutdown().await;
        // No receivers if the loops were never started
        let _ = self.shutdown_tx.send(());

        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Control plane loop ended abnormally");
            }
        }
        if let Some(containment) = &self.containment {
            containment.release_all().await;
        }

        self.logger.log_shutdown(reason);
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn node_name(&self) -> &str {
        &self.config.node_name
    }

    pub fn metrics(&self) -> &HealerMetrics {
        &self.metrics
    }

    pub fn registry(&self) -> &HealthRegistry {
        &self.registry
    }

    pub fn orchestrator(&self) -> &Arc<TaskOrchestrator> {
        &self.orchestrator
    }

    pub fn executor(&self) -> &Arc<HealingExecutor> {
        &self.executor
    }

    pub fn suppression(&self) -> &Arc<SuppressionEngine> {
        &self.suppression
    }

    pub fn anomaly_store(&self) -> &Arc<AnomalyStore> {
        &self.anomalies
    }

    pub fn containment(&self) -> Option<&Arc<ContainmentManager>> {
        self.containment.as_ref()
    }

    pub async fn run_health_cycle(&self) -> CycleOutcome {
        self.monitor.run_shallow_cycle().await
    }

    pub async fn run_deep_cycle(&self) -> CycleOutcome {
        self.monitor.run_deep_cycle().await
    }

    pub async fn run_healing_cycle(&self) -> Option<Vec<HealingAction>> {
        self.executor.run_cycle().await
    }

    /// Administrative override; returns the previous global state
    pub async fn override_state(&self, component: &str, state: GlobalState) -> Result<GlobalState, HealerError> {
        self.executor.override_state(component, state).await
    }

    pub async fn health(&self) -> HealthResponse {
        self.registry.health().await
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        self.registry.readiness().await
    }

    pub async fn components(&self) -> Vec<ComponentHealth> {
        self.registry.all().await
    }

    pub async fn anomalies(&self, include_resolved: bool) -> Vec<AnomalyReport> {
        if include_resolved {
            self.anomalies.all().await
        } else {
            self.anomalies.unresolved().await
        }
    }

    /// Healing actions, newest first
    pub async fn actions(&self, limit: usize) -> Vec<HealingAction> {
        self.executor.recent(limit).await
    }

    pub async fn tasks(&self) -> OrchestratorStatus {
        self.orchestrator.status().await
    }

    pub async fn suppression_snapshot(&self) -> SuppressionSnapshot {
        self.suppression.snapshot().await
    }

    pub async fn containment_status(&self) -> ContainmentStatus {
        match &self.containment {
            Some(containment) => containment.status().await,
            None => ContainmentStatus::default(),
        }
    }

    pub async fn status(&self) -> StatusReport {
        let health = self.registry.health().await;
        StatusReport {
            node: self.config.node_name.clone(),
            version: VERSION.to_string(),
            ready: self.registry.readiness().await.ready,
            overall: health.status,
            components: health.components,
            unresolved_anomalies: self.anomalies.unresolved().await,
            recent_actions: self.executor.recent(STATUS_RECENT_ACTIONS).await,
            pending_escalations: self.executor.pending_escalations().await,
            orchestrator: self.orchestrator.status().await,
            suppression: self.suppression.snapshot().await,
            containment: self.containment_status().await,
            latest_sample: self.sampler.history().latest().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containment::{ContainmentAction, ContainmentTrigger};
    use crate::healing::RemediationOutcome;
    use crate::health::ProbeOutcome;
    use crate::models::{ActionStatus, RemediationType, ResourceKind, WorkloadUsage};
    use async_trait::async_trait;

    /// Healthy while the flag is set
    struct FlagProbe(Arc<AtomicBool>);

    #[async_trait]
    impl Probe for FlagProbe {
        async fn probe(&self) -> anyhow::Result<ProbeOutcome> {
            if self.0.load(Ordering::SeqCst) {
                Ok(ProbeOutcome::healthy())
            } else {
                Ok(ProbeOutcome::unhealthy("connection refused"))
            }
        }
    }

    /// Restores the flag of whatever it is asked to heal
    struct FlagRemediator(Arc<AtomicBool>);

    #[async_trait]
    impl Remediator for FlagRemediator {
        async fn remediate(&self, remediation: RemediationType, target: &str) -> anyhow::Result<RemediationOutcome> {
            self.0.store(true, Ordering::SeqCst);
            Ok(RemediationOutcome::ok(format!("{} on {}", remediation, target)))
        }
    }

    struct FixedSource(f64);

    #[async_trait]
    impl MetricsSource for FixedSource {
        async fn sample(&self) -> anyhow::Result<ResourceSample> {
            Ok(ResourceSample {
                cpu_percent: self.0,
                memory_percent: 30.0,
                workloads: vec![WorkloadUsage {
                    id: "5004242".to_string(),
                    name: "batch".to_string(),
                    cpu_percent: self.0,
                    memory_percent: 10.0,
                }],
                ..Default::default()
            })
        }
    }

    #[derive(Default)]
    struct CountingController {
        isolated: std::sync::Mutex<Vec<String>>,
        released: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl WorkloadController for CountingController {
        async fn isolate(&self, workload: &WorkloadUsage) -> anyhow::Result<()> {
            self.isolated.lock().unwrap().push(workload.id.clone());
            Ok(())
        }

        async fn release(&self, workload_id: &str) -> anyhow::Result<()> {
            self.released.lock().unwrap().push(workload_id.to_string());
            Ok(())
        }

        async fn deprioritize(&self, _workload: &WorkloadUsage) -> anyhow::Result<()> {
            Ok(())
        }

        async fn terminate(&self, _workload: &WorkloadUsage) -> anyhow::Result<()> {
            Ok(())
        }

        async fn scale_down(&self, _protocol_id: &str, _resource: ResourceKind) -> anyhow::Result<()> {
            Ok(())
        }
    }

    fn config() -> ControlPlaneConfig {
        ControlPlaneConfig {
            node_name: "test-node".to_string(),
            health: HealthMonitorConfig {
                probe_interval: Duration::from_secs(10),
                min_uptime: Duration::ZERO,
                ..Default::default()
            },
            healing_interval: Duration::from_secs(15),
            ..Default::default()
        }
    }

    fn healthy() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(true))
    }

    #[tokio::test]
    async fn test_build_rejects_unknown_dependency() {
        let result = ControlPlane::builder(config())
            .component("cache", Arc::new(FlagProbe(healthy())), &["datastore"])
            .remediator(Arc::new(FlagRemediator(healthy())))
            .metrics_source(Arc::new(FixedSource(10.0)))
            .build()
            .await;
        assert!(matches!(result, Err(HealerError::Config(_))));
    }

    #[tokio::test]
    async fn test_build_requires_remediator_and_controller() {
        let result = ControlPlane::builder(config())
            .component("datastore", Arc::new(FlagProbe(healthy())), &[])
            .build()
            .await;
        assert!(result.is_err());

        let result = ControlPlane::builder(config())
            .component("datastore", Arc::new(FlagProbe(healthy())), &[])
            .remediator(Arc::new(FlagRemediator(healthy())))
            .containment_protocol(ContainmentProtocol::new(
                "cpu",
                ContainmentTrigger {
                    resource: ResourceKind::Cpu,
                    threshold_percent: 90.0,
                    sustained: Duration::ZERO,
                },
                vec![ContainmentAction::Isolate],
            ))
            .build()
            .await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unhealthy_component_is_healed_end_to_end() {
        let cache_up = Arc::new(AtomicBool::new(false));
        let plane = ControlPlane::builder(config())
            .component("datastore", Arc::new(FlagProbe(healthy())), &[])
            .component("cache", Arc::new(FlagProbe(cache_up.clone())), &["datastore"])
            .remediator(Arc::new(FlagRemediator(cache_up.clone())))
            .metrics_source(Arc::new(FixedSource(10.0)))
            .build()
            .await
            .unwrap();

        plane.start().await;
        plane.start().await;
        assert!(plane.readiness().await.ready);

        tokio::time::sleep(Duration::from_secs(41)).await;

        let status = plane.status().await;
        let cache = status
            .components
            .iter()
            .find(|c| c.component == "cache")
            .unwrap();
        assert_eq!(cache.status, ComponentStatus::Healthy);
        assert!(status.unresolved_anomalies.is_empty());
        assert!(status
            .recent_actions
            .iter()
            .any(|a| a.target == "cache" && a.status == ActionStatus::Completed));

        let mut task_ids: Vec<String> = status.orchestrator.tasks.iter().map(|t| t.id.clone()).collect();
        task_ids.sort();
        assert_eq!(
            task_ids,
            vec![HEALING_EVALUATION_TASK, HEALTH_DEEP_PROBE_TASK, HEALTH_PROBE_TASK]
        );
        assert!(status.latest_sample.is_some());

        plane.shutdown("test").await;
        plane.shutdown("test").await;
        assert!(!plane.readiness().await.ready);
        assert!(!plane.orchestrator().is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_containment_runs_and_releases_on_shutdown() {
        let controller = Arc::new(CountingController::default());
        let plane = ControlPlane::builder(config())
            .component("datastore", Arc::new(FlagProbe(healthy())), &[])
            .remediator(Arc::new(FlagRemediator(healthy())))
            .metrics_source(Arc::new(FixedSource(97.0)))
            .workload_controller(controller.clone())
            .containment_protocol(ContainmentProtocol::new(
                "cpu-guard",
                ContainmentTrigger {
                    resource: ResourceKind::Cpu,
                    threshold_percent: 90.0,
                    sustained: Duration::ZERO,
                },
                vec![ContainmentAction::Isolate],
            ))
            .build()
            .await
            .unwrap();

        plane.start().await;
        tokio::time::sleep(Duration::from_secs(12)).await;

        let status = plane.containment_status().await;
        assert_eq!(status.protocols[0].trigger_count, 1);
        assert_eq!(status.isolated.len(), 1);

        plane.shutdown("test").await;
        assert_eq!(*controller.isolated.lock().unwrap(), vec!["5004242"]);
        assert_eq!(*controller.released.lock().unwrap(), vec!["5004242"]);
    }

    #[tokio::test]
    async fn test_override_through_control_plane() {
        let plane = ControlPlane::builder(config())
            .component("datastore", Arc::new(FlagProbe(healthy())), &[])
            .component("cache", Arc::new(FlagProbe(healthy())), &["datastore"])
            .remediator(Arc::new(FlagRemediator(healthy())))
            .metrics_source(Arc::new(FixedSource(10.0)))
            .build()
            .await
            .unwrap();

        let previous = plane
            .override_state("datastore", GlobalState::Failed)
            .await
            .unwrap();
        assert_eq!(previous, GlobalState::Healthy);
        assert_eq!(
            plane.suppression_snapshot().await.states["datastore"],
            GlobalState::Failed
        );
        assert!(plane.override_state("queue", GlobalState::Healthy).await.is_err());
    }
}
