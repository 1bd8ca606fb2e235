//! Observability infrastructure for the control plane
//!
//! Provides:
//! - Prometheus metrics (probe/remediation latency, anomalies, healing outcomes,
//!   breaker states, suppression, containment)
//! - Structured JSON logging with tracing

use prometheus::{
    register_gauge, register_histogram, register_int_counter, register_int_counter_vec,
    register_int_gauge, register_int_gauge_vec, Gauge, Histogram, IntCounter, IntCounterVec,
    IntGauge, IntGaugeVec,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Default histogram buckets for latency measurements (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<HealerMetricsInner> = OnceLock::new();

struct HealerMetricsInner {
    probe_latency_seconds: Histogram,
    remediation_latency_seconds: Histogram,
    anomalies_detected: IntCounterVec,
    healing_actions: IntCounterVec,
    task_runs: IntCounterVec,
    breaker_open: IntGaugeVec,
    suppressed_components: IntGauge,
    containment_triggers: IntCounterVec,
    sample_errors: IntCounter,
    host_cpu_percent: Gauge,
    host_memory_percent: Gauge,
}

impl HealerMetricsInner {
    fn new() -> Self {
        Self {
            probe_latency_seconds: register_histogram!(
                "healer_probe_latency_seconds",
                "Time spent running component probes",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register probe_latency_seconds"),

            remediation_latency_seconds: register_histogram!(
                "healer_remediation_latency_seconds",
                "Time spent running remediation routines",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register remediation_latency_seconds"),

            anomalies_detected: register_int_counter_vec!(
                "healer_anomalies_detected_total",
                "Total number of anomaly reports raised",
                &["type"]
            )
            .expect("Failed to register anomalies_detected"),

            healing_actions: register_int_counter_vec!(
                "healer_healing_actions_total",
                "Total number of healing actions by outcome",
                &["outcome"]
            )
            .expect("Failed to register healing_actions"),

            task_runs: register_int_counter_vec!(
                "healer_task_runs_total",
                "Scheduled task firings by task and outcome",
                &["task", "outcome"]
            )
            .expect("Failed to register task_runs"),

            breaker_open: register_int_gauge_vec!(
                "healer_circuit_breaker_open",
                "Whether a task's circuit breaker is open (1) or closed (0)",
                &["task"]
            )
            .expect("Failed to register breaker_open"),

            suppressed_components: register_int_gauge!(
                "healer_suppressed_components",
                "Number of components currently suppressed"
            )
            .expect("Failed to register suppressed_components"),

            containment_triggers: register_int_counter_vec!(
                "healer_containment_triggers_total",
                "Containment protocol activations",
                &["protocol"]
            )
            .expect("Failed to register containment_triggers"),

            sample_errors: register_int_counter!(
                "healer_sample_errors_total",
                "Total number of failed host metric samples"
            )
            .expect("Failed to register sample_errors"),

            host_cpu_percent: register_gauge!(
                "healer_host_cpu_percent",
                "Host CPU utilisation from the latest sample"
            )
            .expect("Failed to register host_cpu_percent"),

            host_memory_percent: register_gauge!(
                "healer_host_memory_percent",
                "Host memory utilisation from the latest sample"
            )
            .expect("Failed to register host_memory_percent"),
        }
    }
}

/// Control-plane metrics for Prometheus exposition
///
/// This is a lightweight handle to the global metrics instance.
/// Multiple clones share the same underlying metrics.
#[derive(Clone)]
pub struct HealerMetrics {
    _private: (),
}

impl Default for HealerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl HealerMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(HealerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &HealerMetricsInner {
        GLOBAL_METRICS.get_or_init(HealerMetricsInner::new)
    }

    pub fn observe_probe_latency(&self, duration_secs: f64) {
        self.inner().probe_latency_seconds.observe(duration_secs);
    }

    pub fn observe_remediation_latency(&self, duration_secs: f64) {
        self.inner().remediation_latency_seconds.observe(duration_secs);
    }

    pub fn inc_anomalies(&self, anomaly_type: &str) {
        self.inner()
            .anomalies_detected
            .with_label_values(&[anomaly_type])
            .inc();
    }

    pub fn inc_healing_actions(&self, outcome: &str) {
        self.inner()
            .healing_actions
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_task_runs(&self, task: &str, outcome: &str) {
        self.inner()
            .task_runs
            .with_label_values(&[task, outcome])
            .inc();
    }

    pub fn set_breaker_open(&self, task: &str, open: bool) {
        self.inner()
            .breaker_open
            .with_label_values(&[task])
            .set(i64::from(open));
    }

    pub fn set_suppressed_components(&self, count: i64) {
        self.inner().suppressed_components.set(count);
    }

    pub fn inc_containment_triggers(&self, protocol: &str) {
        self.inner()
            .containment_triggers
            .with_label_values(&[protocol])
            .inc();
    }

    pub fn inc_sample_errors(&self) {
        self.inner().sample_errors.inc();
    }

    /// Update host usage gauges from the latest sample
    pub fn set_host_usage(&self, cpu_percent: f64, memory_percent: f64) {
        self.inner().host_cpu_percent.set(cpu_percent);
        self.inner().host_memory_percent.set(memory_percent);
    }
}

/// Structured logger for control-plane events
///
/// Provides consistent JSON-formatted logging for anomalies, healing
/// actions, suppression decisions and other significant events.
#[derive(Clone)]
pub struct StructuredLogger {
    node_name: String,
}

impl StructuredLogger {
    pub fn new(node_name: impl Into<String>) -> Self {
        Self {
            node_name: node_name.into(),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    /// Log an anomaly detection event
    pub fn log_anomaly(&self, component: &str, anomaly_type: &str, severity: &str, details: &str) {
        match severity {
            "critical" | "high" => {
                warn!(
                    event = "anomaly_detected",
                    node = %self.node_name,
                    component = %component,
                    anomaly_type = %anomaly_type,
                    severity = %severity,
                    details = %details,
                    "Anomaly detected"
                );
            }
            _ => {
                info!(
                    event = "anomaly_detected",
                    node = %self.node_name,
                    component = %component,
                    anomaly_type = %anomaly_type,
                    severity = %severity,
                    details = %details,
                    "Anomaly detected"
                );
            }
        }
    }

    /// Log a healing action reaching a terminal state
    pub fn log_healing_action(
        &self,
        action_id: &str,
        component: &str,
        remediation: &str,
        status: &str,
        result: &str,
    ) {
        if status == "completed" {
            info!(
                event = "healing_action",
                node = %self.node_name,
                action_id = %action_id,
                component = %component,
                remediation = %remediation,
                status = %status,
                result = %result,
                "Healing action completed"
            );
        } else {
            warn!(
                event = "healing_action",
                node = %self.node_name,
                action_id = %action_id,
                component = %component,
                remediation = %remediation,
                status = %status,
                result = %result,
                "Healing action did not complete"
            );
        }
    }

    /// Log a component being marked suppressed
    pub fn log_suppression(&self, component: &str, upstream: &str, reason: &str) {
        warn!(
            event = "suppression_applied",
            node = %self.node_name,
            component = %component,
            upstream = %upstream,
            reason = %reason,
            "Healing suppressed for component"
        );
    }

    /// Log a remediation loop detection
    pub fn log_loop_detected(&self, component: &str, signature: &str, count: usize, window_secs: u64) {
        warn!(
            event = "loop_detected",
            node = %self.node_name,
            component = %component,
            signature = %signature,
            count = count,
            window_secs = window_secs,
            "Remediation loop detected, suppressing further healing"
        );
    }

    /// Log a degraded component escalating to failed
    pub fn log_escalation(&self, component: &str, grace_secs: u64) {
        warn!(
            event = "component_escalated",
            node = %self.node_name,
            component = %component,
            grace_secs = grace_secs,
            "Component still degraded after grace period, marking failed"
        );
    }

    /// Log a containment protocol activation
    pub fn log_containment(&self, protocol: &str, resource: &str, usage: f64, threshold: f64, workloads: &[String]) {
        warn!(
            event = "containment_triggered",
            node = %self.node_name,
            protocol = %protocol,
            resource = %resource,
            usage_percent = usage,
            threshold_percent = threshold,
            workloads = ?workloads,
            "Containment protocol triggered"
        );
    }

    /// Log a circuit breaker transition
    pub fn log_breaker_transition(&self, task: &str, open: bool, failure_count: u32) {
        if open {
            warn!(
                event = "breaker_transition",
                node = %self.node_name,
                task = %task,
                state = "open",
                failure_count = failure_count,
                "Circuit breaker opened"
            );
        } else {
            info!(
                event = "breaker_transition",
                node = %self.node_name,
                task = %task,
                state = "closed",
                "Circuit breaker closed"
            );
        }
    }

    /// Log an administrative override
    pub fn log_override(&self, component: &str, previous: &str, state: &str) {
        info!(
            event = "override_applied",
            node = %self.node_name,
            component = %component,
            previous = %previous,
            state = %state,
            "Administrative override applied"
        );
    }

    /// Log control plane startup
    pub fn log_startup(&self, version: &str, components: usize) {
        info!(
            event = "healer_started",
            node = %self.node_name,
            version = %version,
            components = components,
            "Self-healing control plane started"
        );
    }

    /// Log control plane shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "healer_shutdown",
            node = %self.node_name,
            reason = %reason,
            "Self-healing control plane shutting down"
        );
    }
}
