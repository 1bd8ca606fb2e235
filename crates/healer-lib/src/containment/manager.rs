//! Containment manager
//!
//! Each sample is checked against every protocol in registration order:
//! cooldown first, then the threshold, then how long the breach has lasted.
//! A protocol that triggers stamps its last-triggered time before any action
//! runs, so two breaches inside one cooldown produce a single containment.
//!
//! Init and the process running the manager are never offenders.

use super::{ContainmentAction, ContainmentProtocol, WorkloadController};
use crate::error::HealerError;
use crate::models::{unix_now, ResourceKind, ResourceSample, WorkloadUsage};
use crate::observability::{HealerMetrics, StructuredLogger};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Containment events kept for the status API
const EVENT_HISTORY_CAP: usize = 100;

/// Workload id of init
const INIT_WORKLOAD_ID: &str = "1";

struct ProtocolState {
    protocol: ContainmentProtocol,
    last_triggered: Option<Instant>,
    last_triggered_at: Option<i64>,
    breach_started: Option<Instant>,
    trigger_count: u64,
}

/// Outcome of one containment step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: ContainmentAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workload: Option<String>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A protocol trigger and what was done about it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainmentEvent {
    pub protocol_id: String,
    pub resource: ResourceKind,
    pub usage_percent: f64,
    pub threshold_percent: f64,
    pub triggered_at: i64,
    pub actions: Vec<ActionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolatedWorkload {
    pub id: String,
    pub name: String,
    pub protocol_id: String,
    pub isolated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolStatus {
    pub id: String,
    pub resource: ResourceKind,
    pub threshold_percent: f64,
    pub sustained_secs: u64,
    pub cooldown_secs: u64,
    pub actions: Vec<ContainmentAction>,
    pub allow_terminate: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_triggered_at: Option<i64>,
    pub trigger_count: u64,
    pub in_cooldown: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainmentStatus {
    pub protocols: Vec<ProtocolStatus>,
    pub isolated: Vec<IsolatedWorkload>,
    pub recent_events: Vec<ContainmentEvent>,
}

pub struct ContainmentManager {
    protocols: RwLock<Vec<ProtocolState>>,
    isolated: DashMap<String, IsolatedWorkload>,
    events: RwLock<VecDeque<ContainmentEvent>>,
    controller: Arc<dyn WorkloadController>,
    protected: HashSet<String>,
    metrics: HealerMetrics,
    logger: StructuredLogger,
}

impl ContainmentManager {
    pub fn new(controller: Arc<dyn WorkloadController>, metrics: HealerMetrics, logger: StructuredLogger) -> Self {
        Self {
            protocols: RwLock::new(Vec::new()),
            isolated: DashMap::new(),
            events: RwLock::new(VecDeque::new()),
            controller,
            protected: HashSet::from([INIT_WORKLOAD_ID.to_string(), std::process::id().to_string()]),
            metrics,
            logger,
        }
    }

    /// Register a protocol; ids must be unique
    pub async fn register(&self, protocol: ContainmentProtocol) -> Result<(), HealerError> {
        protocol.validate()?;
        let mut protocols = self.protocols.write().await;
        if protocols.iter().any(|s| s.protocol.id == protocol.id) {
            return Err(HealerError::Config(format!(
                "duplicate containment protocol {}",
                protocol.id
            )));
        }
        info!(
            protocol = %protocol.id,
            resource = %protocol.trigger.resource,
            threshold_percent = protocol.trigger.threshold_percent,
            "Containment protocol registered"
        );
        protocols.push(ProtocolState {
            protocol,
            last_triggered: None,
            last_triggered_at: None,
            breach_started: None,
            trigger_count: 0,
        });
        Ok(())
    }

    pub async fn protocol_count(&self) -> usize {
        self.protocols.read().await.len()
    }

    /// Never act on the workload with this id
    pub fn protect(mut self, workload_id: impl Into<String>) -> Self {
        self.protected.insert(workload_id.into());
        self
    }

    pub fn is_protected(&self, workload_id: &str) -> bool {
        self.protected.contains(workload_id)
    }

    /// Evaluate every protocol against a sample and run those that trigger
    pub async fn evaluate(&self, sample: &ResourceSample) -> Vec<ContainmentEvent> {
        self.prune_exited(sample).await;

        let now = Instant::now();
        let triggered: Vec<(ContainmentProtocol, f64)> = {
            let mut protocols = self.protocols.write().await;
            protocols
                .iter_mut()
                .filter_map(|state| Self::check(state, sample, now))
                .collect()
        };

        let mut events = Vec::with_capacity(triggered.len());
        for (protocol, usage) in triggered {
            let event = self.execute(&protocol, sample, usage).await;
            self.record(event.clone()).await;
            events.push(event);
        }
        events
    }

    /// Forget isolated workloads that have exited
    async fn prune_exited(&self, sample: &ResourceSample) {
        let missing: Vec<String> = self
            .isolated
            .iter()
            .map(|e| e.key().clone())
            .filter(|id| !sample.workloads.iter().any(|w| &w.id == id))
            .collect();

        for id in missing {
            if !self.controller.workload_exists(&id).await {
                debug!(workload = %id, "Isolated workload exited, forgetting it");
                self.isolated.remove(&id);
            }
        }
    }

    fn check(state: &mut ProtocolState, sample: &ResourceSample, now: Instant) -> Option<(ContainmentProtocol, f64)> {
        let trigger = &state.protocol.trigger;

        if let Some(last) = state.last_triggered {
            if now.duration_since(last) < state.protocol.cooldown {
                return None;
            }
        }

        let usage = sample.usage(trigger.resource);
        if usage <= trigger.threshold_percent {
            state.breach_started = None;
            return None;
        }

        let started = *state.breach_started.get_or_insert(now);
        if now.duration_since(started) < trigger.sustained {
            debug!(
                protocol = %state.protocol.id,
                usage_percent = usage,
                "Breach not yet sustained"
            );
            return None;
        }

        state.last_triggered = Some(now);
        state.last_triggered_at = Some(unix_now());
        state.breach_started = None;
        state.trigger_count += 1;
        Some((state.protocol.clone(), usage))
    }

    async fn execute(&self, protocol: &ContainmentProtocol, sample: &ResourceSample, usage: f64) -> ContainmentEvent {
        let resource = protocol.trigger.resource;
        let mut offenders: Vec<&WorkloadUsage> = sample
            .workloads
            .iter()
            .filter(|w| !self.is_protected(&w.id))
            .collect();
        offenders.sort_by(|a, b| b.usage(resource).total_cmp(&a.usage(resource)));
        offenders.truncate(protocol.max_offenders);

        let mut records = Vec::new();
        for action in &protocol.actions {
            match action {
                ContainmentAction::Isolate => {
                    for workload in &offenders {
                        if self.isolated.contains_key(&workload.id) {
                            continue;
                        }
                        let result = self.controller.isolate(workload).await;
                        if result.is_ok() {
                            self.isolated.insert(
                                workload.id.clone(),
                                IsolatedWorkload {
                                    id: workload.id.clone(),
                                    name: workload.name.clone(),
                                    protocol_id: protocol.id.clone(),
                                    isolated_at: unix_now(),
                                },
                            );
                        }
                        records.push(action_record(*action, Some(workload.id.as_str()), result));
                    }
                }
                ContainmentAction::Deprioritize => {
                    for workload in &offenders {
                        let result = self.controller.deprioritize(workload).await;
                        records.push(action_record(*action, Some(workload.id.as_str()), result));
                    }
                }
                ContainmentAction::Terminate => {
                    if !protocol.allow_terminate {
                        debug!(protocol = %protocol.id, "Terminate not enabled, skipping");
                        continue;
                    }
                    for workload in offenders.iter().take(protocol.terminate_limit) {
                        let result = self.controller.terminate(workload).await;
                        if result.is_ok() {
                            self.isolated.remove(&workload.id);
                        }
                        records.push(action_record(*action, Some(workload.id.as_str()), result));
                    }
                }
                ContainmentAction::ScaleDown => {
                    let result = self.controller.scale_down(&protocol.id, resource).await;
                    records.push(action_record(*action, None, result));
                }
            }
        }

        let workloads: Vec<String> = offenders.iter().map(|w| w.id.clone()).collect();
        self.metrics.inc_containment_triggers(&protocol.id);
        self.logger.log_containment(
            &protocol.id,
            &resource.to_string(),
            usage,
            protocol.trigger.threshold_percent,
            &workloads,
        );

        ContainmentEvent {
            protocol_id: protocol.id.clone(),
            resource,
            usage_percent: usage,
            threshold_percent: protocol.trigger.threshold_percent,
            triggered_at: unix_now(),
            actions: records,
        }
    }

    async fn record(&self, event: ContainmentEvent) {
        let mut events = self.events.write().await;
        events.push_back(event);
        while events.len() > EVENT_HISTORY_CAP {
            events.pop_front();
        }
    }

    pub fn is_isolated(&self, workload_id: &str) -> bool {
        self.isolated.contains_key(workload_id)
    }

    /// Release every isolated workload; returns how many were released
    pub async fn release_all(&self) -> usize {
        let ids: Vec<String> = self.isolated.iter().map(|e| e.key().clone()).collect();
        let mut released = 0;
        for id in ids {
            match self.controller.release(&id).await {
                Ok(()) => released += 1,
                Err(e) => warn!(workload = %id, error = %e, "Failed to release workload"),
            }
            self.isolated.remove(&id);
        }
        if released > 0 {
            info!(released = released, "Isolated workloads released");
        }
        released
    }

    pub async fn status(&self) -> ContainmentStatus {
        let now = Instant::now();
        let protocols = self
            .protocols
            .read()
            .await
            .iter()
            .map(|state| ProtocolStatus {
                id: state.protocol.id.clone(),
                resource: state.protocol.trigger.resource,
                threshold_percent: state.protocol.trigger.threshold_percent,
                sustained_secs: state.protocol.trigger.sustained.as_secs(),
                cooldown_secs: state.protocol.cooldown.as_secs(),
                actions: state.protocol.actions.clone(),
                allow_terminate: state.protocol.allow_terminate,
                last_triggered_at: state.last_triggered_at,
                trigger_count: state.trigger_count,
                in_cooldown: state
                    .last_triggered
                    .map(|last| now.duration_since(last) < state.protocol.cooldown)
                    .unwrap_or(false),
            })
            .collect();

        let mut isolated: Vec<IsolatedWorkload> = self.isolated.iter().map(|e| e.value().clone()).collect();
        isolated.sort_by(|a, b| a.id.cmp(&b.id));

        ContainmentStatus {
            protocols,
            isolated,
            recent_events: self.events.read().await.iter().cloned().collect(),
        }
    }

    /// Consume samples until shutdown, then release isolated workloads
    pub async fn run(self: Arc<Self>, mut samples: broadcast::Receiver<ResourceSample>, mut shutdown: broadcast::Receiver<()>) {
        let protocols = self.protocol_count().await;
        info!(protocols = protocols, "Starting containment manager");

        loop {
            tokio::select! {
                received = samples.recv() => {
                    match received {
                        Ok(sample) => {
                            self.evaluate(&sample).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped = skipped, "Containment manager lagging behind samples");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            debug!("Sample channel closed");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down containment manager");
                    break;
                }
            }
        }

        self.release_all().await;
    }
}

fn action_record(action: ContainmentAction, workload: Option<&str>, result: anyhow::Result<()>) -> ActionRecord {
    match result {
        Ok(()) => ActionRecord {
            action,
            workload: workload.map(str::to_string),
            ok: true,
            error: None,
        },
        Err(e) => {
            warn!(action = %action, workload = ?workload, error = %e, "Containment action failed");
            ActionRecord {
                action,
                workload: workload.map(str::to_string),
                ok: false,
                error: Some(format!("{:#}", e)),
            }
        }
    }
}
