//! Healing executor
//!
//! Each evaluation cycle turns unhealthy components and unresolved critical
//! anomalies into [`HealingAction`]s, queues them FIFO and works the queue
//! one action at a time. Per action:
//!
//! 1. suppressed by the dependency engine: fail with the upstream cause
//! 2. error signature repeating inside the loop window: fail, mark the
//!    component degraded and arm the escalation to failed
//! 3. otherwise run the remediation under a timeout
//!
//! Nothing here propagates an error to the scheduler.

use super::{with_rollback, ErrorWindows, EscalationTimers, HealingAction, Remediator};
use crate::anomaly::AnomalyStore;
use crate::error::HealerError;
use crate::health::{
    ComponentHealth, ComponentStatus, CycleGuard, HealthRegistry, LoopSuppression, INTEGRITY_METRIC,
};
use crate::models::{unix_now, AnomalyType, GlobalState, RemediationType, Severity};
use crate::observability::{HealerMetrics, StructuredLogger};
use crate::suppression::SuppressionEngine;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Integrity below this selects data recovery over a restart
const RECOVERY_INTEGRITY_THRESHOLD: f64 = 50.0;

/// Configuration for the healing executor
#[derive(Debug, Clone)]
pub struct HealingConfig {
    /// Actions started per evaluation cycle
    pub max_actions_per_cycle: usize,
    /// Loop detection window (default: 5 minutes)
    pub loop_window: Duration,
    /// Errors inside the window that constitute a loop
    pub loop_threshold: usize,
    /// Grace period before a loop-degraded component is marked failed
    pub escalation_delay: Duration,
    pub remediation_timeout: Duration,
    pub action_history_cap: usize,
    pub action_retention: Duration,
    /// Maximum tracked (component, signature) windows
    pub error_window_cap: usize,
    /// Remediation forced for specific components
    pub remediation_overrides: HashMap<String, RemediationType>,
}

impl Default for HealingConfig {
    fn default() -> Self {
        Self {
            max_actions_per_cycle: 5,
            loop_window: Duration::from_secs(300),
            loop_threshold: 3,
            escalation_delay: Duration::from_secs(120),
            remediation_timeout: Duration::from_secs(30),
            action_history_cap: 200,
            action_retention: Duration::from_secs(24 * 60 * 60),
            error_window_cap: 256,
            remediation_overrides: HashMap::new(),
        }
    }
}

pub struct HealingExecutor {
    config: HealingConfig,
    registry: HealthRegistry,
    anomalies: Arc<AnomalyStore>,
    suppression: Arc<SuppressionEngine>,
    remediator: Arc<dyn Remediator>,
    escalations: Arc<EscalationTimers>,
    queue: Mutex<VecDeque<HealingAction>>,
    worker: Mutex<()>,
    transitions: Mutex<()>,
    history: RwLock<VecDeque<HealingAction>>,
    windows: Mutex<ErrorWindows>,
    cycle_running: AtomicBool,
    metrics: HealerMetrics,
    logger: StructuredLogger,
}

impl HealingExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: HealingConfig,
        registry: HealthRegistry,
        anomalies: Arc<AnomalyStore>,
        suppression: Arc<SuppressionEngine>,
        remediator: Arc<dyn Remediator>,
        escalations: Arc<EscalationTimers>,
        metrics: HealerMetrics,
        logger: StructuredLogger,
    ) -> Self {
        let windows = ErrorWindows::new(
            config.loop_window,
            config.loop_threshold,
            config.error_window_cap,
        );
        Self {
            config,
            registry,
            anomalies,
            suppression,
            remediator,
            escalations,
            queue: Mutex::new(VecDeque::new()),
            worker: Mutex::new(()),
            transitions: Mutex::new(()),
            history: RwLock::new(VecDeque::new()),
            windows: Mutex::new(windows),
            cycle_running: AtomicBool::new(false),
            metrics,
            logger,
        }
    }

    pub fn config(&self) -> &HealingConfig {
        &self.config
    }

    /// Select, queue and process this cycle's healing actions
    ///
    /// Returns `None` if the previous cycle is still running. Dropping the
    /// returned future mid-cycle releases the cycle for the next caller.
    pub async fn run_cycle(self: &Arc<Self>) -> Option<Vec<HealingAction>> {
        let Some(_cycle) = CycleGuard::try_acquire(&self.cycle_running) else {
            debug!("Healing cycle still running, skipping");
            return None;
        };

        let actions = self.select_actions().await;
        let queued = actions.len();
        for action in actions {
            self.enqueue(action).await;
        }
        let processed = self.drain().await;

        if queued > 0 {
            info!(queued = queued, processed = processed.len(), "Healing cycle complete");
        }
        Some(processed)
    }

    /// Actions for this cycle: unresolved critical anomalies oldest first,
    /// then unhealthy components, one per component, capped
    async fn select_actions(&self) -> Vec<HealingAction> {
        let cap = self.config.max_actions_per_cycle;
        let queued: HashSet<String> = self
            .queue
            .lock()
            .await
            .iter()
            .map(|a| a.target.clone())
            .collect();
        let mut seen: HashSet<String> = HashSet::new();
        let mut actions = Vec::new();

        for anomaly in self.anomalies.unresolved_at_least(Severity::Critical).await {
            if actions.len() >= cap {
                break;
            }
            if seen.contains(&anomaly.component) || queued.contains(&anomaly.component) {
                continue;
            }
            let Some(health) = self.eligible(&anomaly.component).await else {
                continue;
            };
            seen.insert(anomaly.component.clone());
            let remediation = self.select_remediation(&health, Some(anomaly.anomaly_type));
            actions.push(
                HealingAction::new(&anomaly.component, remediation, anomaly.severity)
                    .with_anomaly(&anomaly.id, anomaly.anomaly_type),
            );
        }

        for health in self.registry.all().await {
            if actions.len() >= cap {
                break;
            }
            if !health.status.needs_healing()
                || seen.contains(&health.component)
                || queued.contains(&health.component)
            {
                continue;
            }
            if self.eligible(&health.component).await.is_none() {
                continue;
            }
            seen.insert(health.component.clone());
            let remediation = self.select_remediation(&health, None);
            let severity = match health.status {
                ComponentStatus::Critical => Severity::Critical,
                _ => Severity::High,
            };
            actions.push(HealingAction::new(&health.component, remediation, severity));
        }

        actions
    }

    /// Health of a component that may be healed right now
    ///
    /// Failed components wait for an override; loop-degraded components wait
    /// for recovery or escalation.
    async fn eligible(&self, component: &str) -> Option<ComponentHealth> {
        let health = self.registry.get(component).await?;
        if health.status == ComponentStatus::Failed || health.loop_suppression.is_some() {
            return None;
        }
        if self.suppression.state_of(component).await == GlobalState::Failed {
            return None;
        }
        Some(health)
    }

    /// Remediation for a component: explicit override, else by anomaly type,
    /// else by the probe-reported integrity score
    pub fn select_remediation(&self, health: &ComponentHealth, anomaly_type: Option<AnomalyType>) -> RemediationType {
        if let Some(remediation) = self.config.remediation_overrides.get(&health.component) {
            return *remediation;
        }
        match anomaly_type {
            Some(AnomalyType::Performance) => RemediationType::RebuildCache,
            Some(AnomalyType::Connectivity) | Some(AnomalyType::Resource) => {
                RemediationType::RestartService
            }
            Some(AnomalyType::DataIntegrity) => RemediationType::RecoverData,
            None => match health.metric_f64(INTEGRITY_METRIC) {
                Some(score) if score < RECOVERY_INTEGRITY_THRESHOLD => RemediationType::RecoverData,
                _ => RemediationType::RestartService,
            },
        }
    }

    pub async fn enqueue(&self, action: HealingAction) {
        debug!(
            action_id = %action.id,
            component = %action.target,
            remediation = %action.remediation,
            "Healing action queued"
        );
        self.queue.lock().await.push_back(action);
    }

    /// Process queued actions one at a time, in arrival order
    pub async fn drain(self: &Arc<Self>) -> Vec<HealingAction> {
        let _worker = self.worker.lock().await;
        let mut processed = Vec::new();

        loop {
            let next = self.queue.lock().await.pop_front();
            let Some(action) = next else {
                break;
            };
            let action = self.process(action).await;
            self.record(action.clone()).await;
            processed.push(action);
        }

        processed
    }

    async fn process(self: &Arc<Self>, mut action: HealingAction) -> HealingAction {
        let target = action.target.clone();
        let anomaly_type = action.anomaly_type.unwrap_or(AnomalyType::Connectivity);

        if let Some(reason) = self.suppression.should_suppress(&target, anomaly_type).await {
            settle(action.fail(format!("suppressed: {}", reason)), &action.id);
            self.metrics.inc_healing_actions("suppressed");
            self.log_outcome(&action);
            return action;
        }

        let signature = self.signature(&action).await;
        let (count, is_loop) = {
            let mut windows = self.windows.lock().await;
            let count = windows.record(&target, &signature, Instant::now());
            (count, windows.is_loop(count))
        };
        if is_loop {
            self.enter_loop(&mut action, signature, count).await;
            return action;
        }

        settle(action.begin_repair(), &action.id);
        let started = Instant::now();
        let result = self.remediate(action.remediation, &target).await;
        self.metrics
            .observe_remediation_latency(started.elapsed().as_secs_f64());

        match result {
            Ok(detail) => {
                self.registry.mark_remediated(&target, &action.remediation.to_string()).await;
                settle(action.complete(detail), &action.id);
                self.suppression.mark_healthy(&target).await;
                self.anomalies.resolve_component(&target).await;
                self.metrics.inc_healing_actions("completed");
            }
            Err(detail) => {
                settle(action.fail(detail), &action.id);
                self.metrics.inc_healing_actions("failed");
            }
        }
        self.log_outcome(&action);
        action
    }

    /// Run the remediation in its own task so panics and timeouts are
    /// recorded like any other failure
    async fn remediate(&self, remediation: RemediationType, target: &str) -> Result<String, String> {
        let remediator = self.remediator.clone();
        let owned_target = target.to_string();
        let handle = tokio::spawn(async move { remediator.remediate(remediation, &owned_target).await });
        let abort = handle.abort_handle();

        match tokio::time::timeout(self.config.remediation_timeout, handle).await {
            Ok(Ok(Ok(outcome))) if outcome.ok => Ok(outcome.detail),
            Ok(Ok(Ok(outcome))) => Err(outcome.detail),
            Ok(Ok(Err(e))) => Err(format!("remediation error: {:#}", e)),
            Ok(Err(e)) if e.is_panic() => Err("remediation panicked".to_string()),
            Ok(Err(e)) => Err(format!("remediation aborted: {}", e)),
            Err(_) => {
                abort.abort();
                Err(HealerError::RemediationTimeout {
                    action: remediation.to_string(),
                    target: target.to_string(),
                    timeout: self.config.remediation_timeout,
                }
                .to_string())
            }
        }
    }

    /// Last known error for the target, else the anomaly type, else its status
    async fn signature(&self, action: &HealingAction) -> String {
        let health = self.registry.get(&action.target).await;
        if let Some(error) = health.as_ref().and_then(|h| h.error()) {
            return error.to_string();
        }
        if let Some(anomaly_type) = action.anomaly_type {
            return anomaly_type.to_string();
        }
        health
            .map(|h| h.status.to_string())
            .unwrap_or_else(|| ComponentStatus::Unknown.to_string())
    }

    async fn enter_loop(self: &Arc<Self>, action: &mut HealingAction, signature: String, count: usize) {
        let target = action.target.clone();
        let window_secs = self.config.loop_window.as_secs();
        settle(
            action.fail(format!(
                "remediation loop detected: '{}' seen {} times within {}s",
                signature, count, window_secs
            )),
            &action.id,
        );
        self.metrics.inc_healing_actions("loop_suppressed");
        self.logger
            .log_loop_detected(&target, &signature, count, window_secs);
        self.log_outcome(action);

        let episode = self.escalations.next_episode();
        let marked = self
            .registry
            .mark_loop_degraded(
                &target,
                LoopSuppression {
                    signature,
                    count,
                    detected_at: unix_now(),
                    episode,
                },
            )
            .await;
        if !marked {
            warn!(component = %target, "Loop detected for unregistered component");
            return;
        }

        let this = Arc::clone(self);
        let component = target.clone();
        self.escalations
            .arm(&target, episode, self.config.escalation_delay, async move {
                this.escalate(&component, episode).await;
            })
            .await;
    }

    /// Move a still-degraded component to failed and fan the failure out
    pub async fn escalate(&self, component: &str, episode: u64) {
        self.escalations.finish(component, episode).await;

        let snapshot = self.registry.get(component).await;
        let prior_state = self.suppression.state_of(component).await;
        let prior_reason = self.suppression.reason_for(component).await;
        let (registry, suppression) = (&self.registry, &self.suppression);
        let (snapshot, prior_reason) = (&snapshot, &prior_reason);

        let result = with_rollback(
            &self.transitions,
            async move {
                if registry.escalate_episode(component, episode).await.is_none() {
                    return Ok(None);
                }
                suppression.notify_failure(component).await.map(Some)
            },
            move || async move {
                if let Some(previous) = snapshot.clone() {
                    registry.update(previous).await;
                }
                suppression
                    .restore(component, prior_state, prior_reason.clone())
                    .await;
            },
        )
        .await;

        match result {
            Ok(Some(suppressed)) => {
                self.logger
                    .log_escalation(component, self.config.escalation_delay.as_secs());
                if !suppressed.is_empty() {
                    info!(component = %component, dependents = ?suppressed, "Dependents suppressed");
                }
            }
            Ok(None) => {
                debug!(component = %component, episode = episode, "Stale escalation ignored");
            }
            Err(e) => {
                warn!(component = %component, error = %e, "Escalation rolled back");
            }
        }
    }

    /// Administrative override of a component's global state
    ///
    /// Returns the previous global state. Overriding to healthy also clears
    /// loop suppression, its pending escalation and the component's error
    /// windows.
    pub async fn override_state(&self, component: &str, state: GlobalState) -> Result<GlobalState, HealerError> {
        let prior_state = self.suppression.state_of(component).await;
        let prior_reason = self.suppression.reason_for(component).await;
        let (registry, suppression) = (&self.registry, &self.suppression);
        let prior_reason = &prior_reason;

        let previous = with_rollback(
            &self.transitions,
            async move {
                let previous = suppression.override_state(component, state).await?;
                registry
                    .modify(component, |health| apply_override(health, state))
                    .await
                    .ok_or_else(|| HealerError::UnknownComponent(component.to_string()))?;
                Ok::<_, HealerError>(previous)
            },
            move || async move {
                debug!(component = %component, state = %prior_state, "Rolling back override");
                suppression
                    .restore(component, prior_state, prior_reason.clone())
                    .await;
            },
        )
        .await?;

        if state == GlobalState::Healthy {
            self.escalations.cancel(component).await;
            self.windows.lock().await.clear_component(component);
        }
        Ok(previous)
    }

    async fn record(&self, action: HealingAction) {
        let cutoff = unix_now() - self.config.action_retention.as_secs() as i64;
        let mut history = self.history.write().await;
        history.push_back(action);
        while history.len() > self.config.action_history_cap.max(1) {
            history.pop_front();
        }
        while history
            .front()
            .map(|a| a.completed_at.unwrap_or(a.detected_at) < cutoff)
            .unwrap_or(false)
        {
            history.pop_front();
        }
    }

    fn log_outcome(&self, action: &HealingAction) {
        self.logger.log_healing_action(
            &action.id,
            &action.target,
            &action.remediation.to_string(),
            &action.status.to_string(),
            action.result.as_deref().unwrap_or(""),
        );
    }

    /// Action history, oldest first
    pub async fn history(&self) -> Vec<HealingAction> {
        self.history.read().await.iter().cloned().collect()
    }

    /// The `limit` most recent actions, newest first
    pub async fn recent(&self, limit: usize) -> Vec<HealingAction> {
        self.history
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn queue_len(&self) -> usize {
        self.queue.lock().await.len()
    }

    pub async fn pending_escalations(&self) -> Vec<String> {
        self.escalations.pending().await
    }

    /// Drop queued actions and cancel every escalation timer
    pub async fn shutdown(&self) {
        let dropped = {
            let mut queue = self.queue.lock().await;
            let dropped = queue.len();
            queue.clear();
            dropped
        };
        let cancelled = self.escalations.cancel_all().await;
        if dropped > 0 || cancelled > 0 {
            info!(dropped = dropped, cancelled = cancelled, "Healing executor stopped");
        }
    }
}

fn apply_override(health: &mut ComponentHealth, state: GlobalState) {
    match state {
        GlobalState::Healthy => {
            health.loop_suppression = None;
            if matches!(
                health.status,
                ComponentStatus::Failed | ComponentStatus::Degraded | ComponentStatus::Suppressed
            ) {
                // Re-established by the next probe
                health.status = ComponentStatus::Unknown;
                health.message = Some("reset by operator override".to_string());
            }
        }
        GlobalState::Failed => {
            health.status = ComponentStatus::Failed;
            health.message = Some("failed by operator override".to_string());
        }
        GlobalState::Suppressed => {
            health.status = ComponentStatus::Suppressed;
            health.message = Some("suppressed by operator override".to_string());
        }
    }
}

/// Action transitions here are valid by construction; log if one is not
fn settle(result: Result<(), HealerError>, action_id: &str) {
    if let Err(e) = result {
        warn!(action_id = %action_id, error = %e, "Unexpected healing action transition");
    }
}
