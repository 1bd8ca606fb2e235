//! Tests for the healing executor
//!
//! Component health is written directly into the registry so each scenario
//! starts from a known state without running probes.

#[cfg(test)]
mod executor_tests {
    use crate::anomaly::AnomalyStore;
    use crate::error::HealerError;
    use crate::healing::{
        EscalationTimers, HealingConfig, HealingExecutor, RemediationOutcome, Remediator,
    };
    use crate::health::{ComponentHealth, ComponentStatus, HealthRegistry, LoopSuppression};
    use crate::models::{
        ActionStatus, AnomalyReport, AnomalyType, GlobalState, RemediationType, Severity,
    };
    use crate::observability::{HealerMetrics, StructuredLogger};
    use crate::suppression::{DependencyGraph, SuppressionConfig, SuppressionEngine};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    #[derive(Debug, Clone, Copy)]
    enum Behavior {
        Succeed,
        Fail,
        Error,
        Hang,
        Panic,
    }

    struct MockRemediator {
        default: Behavior,
        per_target: HashMap<String, Behavior>,
        calls: Mutex<Vec<(RemediationType, String)>>,
    }

    impl MockRemediator {
        fn new(default: Behavior) -> Arc<Self> {
            Self::with_targets(default, &[])
        }

        fn with_targets(default: Behavior, targets: &[(&str, Behavior)]) -> Arc<Self> {
            Arc::new(Self {
                default,
                per_target: targets.iter().map(|(t, b)| (t.to_string(), *b)).collect(),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn targets(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(_, t)| t.clone())
                .collect()
        }
    }

    #[async_trait]
    impl Remediator for MockRemediator {
        async fn remediate(&self, remediation: RemediationType, target: &str) -> anyhow::Result<RemediationOutcome> {
            self.calls
                .lock()
                .unwrap()
                .push((remediation, target.to_string()));
            let behavior = self.per_target.get(target).copied().unwrap_or(self.default);
            match behavior {
                Behavior::Succeed => Ok(RemediationOutcome::ok(format!("{} done", remediation))),
                Behavior::Fail => Ok(RemediationOutcome::failed("still down")),
                Behavior::Error => Err(anyhow::anyhow!("control socket unreachable")),
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(RemediationOutcome::ok("late"))
                }
                Behavior::Panic => panic!("remediation bug"),
            }
        }
    }

    struct Fixture {
        executor: Arc<HealingExecutor>,
        registry: HealthRegistry,
        anomalies: Arc<AnomalyStore>,
        suppression: Arc<SuppressionEngine>,
        remediator: Arc<MockRemediator>,
    }

    fn config() -> HealingConfig {
        HealingConfig {
            loop_threshold: 3,
            loop_window: Duration::from_secs(300),
            escalation_delay: Duration::from_secs(60),
            remediation_timeout: Duration::from_secs(5),
            ..Default::default()
        }
    }

    fn fixture(config: HealingConfig, remediator: Arc<MockRemediator>) -> Fixture {
        let graph = DependencyGraph::new()
            .with("datastore", &[])
            .with("cache", &["datastore"])
            .with("server", &["datastore", "cache"])
            .with("telemetry", &["server"]);
        let registry = HealthRegistry::new();
        let anomalies = Arc::new(AnomalyStore::default());
        let suppression = Arc::new(SuppressionEngine::new(
            graph,
            SuppressionConfig::default(),
            HealerMetrics::new(),
            StructuredLogger::new("test-node"),
        ));
        let executor = Arc::new(HealingExecutor::new(
            config,
            registry.clone(),
            anomalies.clone(),
            suppression.clone(),
            remediator.clone(),
            Arc::new(EscalationTimers::new()),
            HealerMetrics::new(),
            StructuredLogger::new("test-node"),
        ));
        Fixture {
            executor,
            registry,
            anomalies,
            suppression,
            remediator,
        }
    }

    async fn set_status(registry: &HealthRegistry, component: &str, status: ComponentStatus, error: Option<&str>) {
        let mut health = ComponentHealth::unknown(component);
        health.status = status;
        if let Some(error) = error {
            health.metrics.insert("error".to_string(), json!(error));
        }
        registry.update(health).await;
    }

    #[tokio::test]
    async fn test_completed_remediation_resolves_anomalies() {
        let f = fixture(config(), MockRemediator::new(Behavior::Succeed));
        set_status(&f.registry, "server", ComponentStatus::Critical, Some("connection refused")).await;
        f.anomalies
            .record(AnomalyReport::new(
                "server",
                AnomalyType::Connectivity,
                Severity::Critical,
                "probe reported unhealthy",
            ))
            .await;

        let actions = f.executor.run_cycle().await.unwrap();
        assert_eq!(actions.len(), 1);
        let action = &actions[0];
        assert_eq!(action.status, ActionStatus::Completed);
        assert_eq!(action.remediation, RemediationType::RestartService);
        assert_eq!(action.anomaly_type, Some(AnomalyType::Connectivity));
        assert!(action.completed_at.is_some());

        assert!(f.anomalies.unresolved_for("server").await.is_empty());
        assert_eq!(f.suppression.state_of("server").await, GlobalState::Healthy);
        assert_eq!(f.remediator.targets(), vec!["server"]);

        // Not healed again before the next probe reports on it
        let health = f.registry.get("server").await.unwrap();
        assert_eq!(health.status, ComponentStatus::Unknown);
        assert!(health.message.unwrap().contains("restart_service"));
        assert!(f.executor.run_cycle().await.unwrap().is_empty());
        assert_eq!(f.remediator.targets().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_cycle_does_not_block_later_cycles() {
        let f = fixture(
            config(),
            MockRemediator::with_targets(Behavior::Succeed, &[("server", Behavior::Hang)]),
        );
        set_status(&f.registry, "server", ComponentStatus::Critical, Some("disconnected")).await;

        let abandoned = tokio::time::timeout(Duration::from_millis(100), f.executor.run_cycle()).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_secs(600)).await;
        set_status(&f.registry, "server", ComponentStatus::Healthy, None).await;
        set_status(&f.registry, "cache", ComponentStatus::Critical, None).await;

        let actions = f.executor.run_cycle().await.expect("cycle must not stay blocked");
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].target, "cache");
        assert_eq!(actions[0].status, ActionStatus::Completed);
    }

    #[tokio::test]
    async fn test_suppressed_dependent_fails_with_upstream_cause() {
        let f = fixture(config(), MockRemediator::new(Behavior::Succeed));
        set_status(&f.registry, "datastore", ComponentStatus::Failed, Some("disk corrupt")).await;
        set_status(&f.registry, "cache", ComponentStatus::Suppressed, None).await;
        f.suppression.notify_failure("datastore").await.unwrap();

        for _ in 0..2 {
            let actions = f.executor.run_cycle().await.unwrap();
            assert_eq!(actions.len(), 1);
            assert_eq!(actions[0].target, "cache");
            assert_eq!(actions[0].status, ActionStatus::Failed);
            assert!(actions[0].result.as_deref().unwrap().contains("datastore"));
        }

        // Neither the failed upstream nor the suppressed dependent was touched
        assert!(f.remediator.targets().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_degrades_then_escalates_to_failed() {
        let f = fixture(config(), MockRemediator::new(Behavior::Fail));
        set_status(&f.registry, "server", ComponentStatus::Critical, Some("disconnected")).await;
        f.registry.register("telemetry").await;

        for _ in 0..2 {
            let actions = f.executor.run_cycle().await.unwrap();
            assert_eq!(actions[0].status, ActionStatus::Failed);
            assert_eq!(actions[0].result.as_deref(), Some("still down"));
        }

        let actions = f.executor.run_cycle().await.unwrap();
        assert!(actions[0].result.as_deref().unwrap().contains("loop detected"));

        let health = f.registry.get("server").await.unwrap();
        assert_eq!(health.status, ComponentStatus::Degraded);
        let annotation = health.loop_suppression.unwrap();
        assert_eq!(annotation.signature, "disconnected");
        assert_eq!(annotation.count, 3);
        assert_eq!(f.executor.pending_escalations().await, vec!["server"]);

        // Loop-degraded components are left alone
        assert!(f.executor.run_cycle().await.unwrap().is_empty());
        assert_eq!(f.remediator.targets().len(), 2);

        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(f.registry.status_of("server").await, Some(ComponentStatus::Failed));
        assert_eq!(f.suppression.state_of("server").await, GlobalState::Failed);
        assert_eq!(f.suppression.state_of("telemetry").await, GlobalState::Suppressed);
        assert!(f.executor.pending_escalations().await.is_empty());

        // Failed components wait for an override
        assert!(f.executor.run_cycle().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_override_to_healthy_cancels_pending_escalation() {
        let f = fixture(config(), MockRemediator::new(Behavior::Fail));
        set_status(&f.registry, "server", ComponentStatus::Critical, Some("disconnected")).await;
        for _ in 0..3 {
            f.executor.run_cycle().await;
        }
        assert_eq!(f.executor.pending_escalations().await, vec!["server"]);

        let previous = f
            .executor
            .override_state("server", GlobalState::Healthy)
            .await
            .unwrap();
        assert_eq!(previous, GlobalState::Healthy);

        let health = f.registry.get("server").await.unwrap();
        assert_eq!(health.status, ComponentStatus::Unknown);
        assert!(health.loop_suppression.is_none());
        assert!(f.executor.pending_escalations().await.is_empty());

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(f.suppression.state_of("server").await, GlobalState::Healthy);
        assert_ne!(f.registry.status_of("server").await, Some(ComponentStatus::Failed));
    }

    #[tokio::test]
    async fn test_override_unknown_component_is_rejected() {
        let f = fixture(config(), MockRemediator::new(Behavior::Succeed));
        assert!(matches!(
            f.executor.override_state("queue", GlobalState::Healthy).await,
            Err(HealerError::UnknownComponent(_))
        ));
        assert!(!f.suppression.snapshot().await.states.contains_key("queue"));
    }

    #[tokio::test]
    async fn test_override_rolls_back_when_health_missing() {
        let f = fixture(config(), MockRemediator::new(Behavior::Succeed));
        // In the graph but never registered with the health registry
        let result = f.executor.override_state("cache", GlobalState::Failed).await;
        assert!(result.is_err());
        assert_eq!(f.suppression.state_of("cache").await, GlobalState::Healthy);
    }

    #[tokio::test]
    async fn test_stale_escalation_is_ignored() {
        let f = fixture(config(), MockRemediator::new(Behavior::Succeed));
        f.registry.register("server").await;
        f.registry
            .mark_loop_degraded(
                "server",
                LoopSuppression {
                    signature: "timeout".to_string(),
                    count: 3,
                    detected_at: 0,
                    episode: 1,
                },
            )
            .await;

        f.executor.escalate("server", 2).await;

        assert_eq!(f.registry.status_of("server").await, Some(ComponentStatus::Degraded));
        assert_eq!(f.suppression.state_of("server").await, GlobalState::Healthy);
    }

    #[tokio::test]
    async fn test_cycle_cap_takes_oldest_anomalies_first() {
        let f = fixture(
            HealingConfig {
                max_actions_per_cycle: 2,
                ..config()
            },
            MockRemediator::new(Behavior::Succeed),
        );
        for component in ["telemetry", "cache", "server"] {
            f.registry.register(component).await;
            f.anomalies
                .record(AnomalyReport::new(
                    component,
                    AnomalyType::Connectivity,
                    Severity::Critical,
                    "unreachable",
                ))
                .await;
        }

        let actions = f.executor.run_cycle().await.unwrap();
        assert_eq!(actions.len(), 2);
        assert_eq!(f.remediator.targets(), vec!["telemetry", "cache"]);
        assert_eq!(f.anomalies.unresolved().await.len(), 1);

        f.executor.run_cycle().await;
        assert_eq!(f.remediator.targets(), vec!["telemetry", "cache", "server"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remediation_errors_become_failed_actions() {
        let remediator = MockRemediator::with_targets(
            Behavior::Succeed,
            &[
                ("datastore", Behavior::Error),
                ("cache", Behavior::Hang),
                ("server", Behavior::Panic),
            ],
        );
        let f = fixture(config(), remediator);
        for component in ["datastore", "cache", "server"] {
            set_status(&f.registry, component, ComponentStatus::Critical, None).await;
        }

        let actions = f.executor.run_cycle().await.unwrap();
        assert_eq!(actions.len(), 3);
        assert!(actions.iter().all(|a| a.status == ActionStatus::Failed));

        let result = |target: &str| {
            actions
                .iter()
                .find(|a| a.target == target)
                .and_then(|a| a.result.clone())
                .unwrap()
        };
        assert!(result("datastore").contains("control socket unreachable"));
        assert!(result("cache").contains("timed out"));
        assert_eq!(result("server"), "remediation panicked");
    }

    #[tokio::test]
    async fn test_queue_is_processed_in_arrival_order() {
        let f = fixture(config(), MockRemediator::new(Behavior::Succeed));
        for component in ["server", "datastore", "cache"] {
            f.registry.register(component).await;
            f.executor
                .enqueue(crate::healing::HealingAction::new(
                    component,
                    RemediationType::RestartService,
                    Severity::High,
                ))
                .await;
        }
        assert_eq!(f.executor.queue_len().await, 3);

        let processed = f.executor.drain().await;
        assert_eq!(processed.len(), 3);
        assert_eq!(f.remediator.targets(), vec!["server", "datastore", "cache"]);
        assert_eq!(f.executor.queue_len().await, 0);
    }

    #[tokio::test]
    async fn test_remediation_selection() {
        let f = fixture(
            HealingConfig {
                remediation_overrides: HashMap::from([(
                    "datastore".to_string(),
                    RemediationType::RepairDatastore,
                )]),
                ..config()
            },
            MockRemediator::new(Behavior::Succeed),
        );

        let datastore = ComponentHealth::unknown("datastore");
        assert_eq!(
            f.executor.select_remediation(&datastore, Some(AnomalyType::Resource)),
            RemediationType::RepairDatastore
        );

        let cache = ComponentHealth::unknown("cache");
        assert_eq!(
            f.executor.select_remediation(&cache, Some(AnomalyType::Performance)),
            RemediationType::RebuildCache
        );
        assert_eq!(
            f.executor.select_remediation(&cache, Some(AnomalyType::DataIntegrity)),
            RemediationType::RecoverData
        );
        assert_eq!(
            f.executor.select_remediation(&cache, None),
            RemediationType::RestartService
        );

        let mut corrupted = ComponentHealth::unknown("server");
        corrupted
            .metrics
            .insert("integrity_score".to_string(), json!(20.0));
        assert_eq!(
            f.executor.select_remediation(&corrupted, None),
            RemediationType::RecoverData
        );
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let f = fixture(
            HealingConfig {
                action_history_cap: 2,
                ..config()
            },
            MockRemediator::new(Behavior::Succeed),
        );
        for component in ["datastore", "cache", "server"] {
            set_status(&f.registry, component, ComponentStatus::Critical, None).await;
        }
        f.executor.run_cycle().await;

        let history = f.executor.history().await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].target, "server");
        assert_eq!(f.executor.recent(1).await[0].target, "server");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_escalations() {
        let f = fixture(config(), MockRemediator::new(Behavior::Fail));
        set_status(&f.registry, "server", ComponentStatus::Critical, Some("disconnected")).await;
        for _ in 0..3 {
            f.executor.run_cycle().await;
        }
        f.executor.shutdown().await;
        f.executor.shutdown().await;

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(f.suppression.state_of("server").await, GlobalState::Healthy);
        assert_eq!(f.registry.status_of("server").await, Some(ComponentStatus::Degraded));
    }
}
