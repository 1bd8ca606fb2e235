//! Daemon configuration
//!
//! Read from an optional file named by `HEALER_CONFIG` (format by extension)
//! layered under `HEALER_*` environment variables. Nested keys use `__`,
//! e.g. `HEALER_PROBE_INTERVAL_SECS=10`.

use anyhow::{bail, Result};
use healer_lib::{
    anomaly::AnomalyStoreConfig,
    containment::{ContainmentAction, ContainmentProtocol, ContainmentTrigger},
    healing::HealingConfig,
    health::HealthMonitorConfig,
    orchestrator::CircuitBreakerConfig,
    sampler::SamplerConfig,
    suppression::{SuppressionConfig, DEFAULT_CRITICAL_COMPONENTS},
    ControlPlaneConfig, RemediationType, ResourceKind,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How a component is probed
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProbeSpec {
    /// Healthy if a TCP connection can be opened
    Tcp { address: String },
    /// Healthy on a 2xx response; a JSON object body is merged into metrics
    Http { url: String },
    /// Healthy on exit status 0; JSON object stdout is merged into metrics
    Command { command: Vec<String> },
}

/// Command lines run for each remediation type
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemediationCommands {
    pub restart_service: Option<Vec<String>>,
    pub rebuild_cache: Option<Vec<String>>,
    pub repair_datastore: Option<Vec<String>>,
    pub recover_data: Option<Vec<String>>,
}

impl RemediationCommands {
    pub fn command_for(&self, remediation: RemediationType) -> Option<&[String]> {
        let command = match remediation {
            RemediationType::RestartService => &self.restart_service,
            RemediationType::RebuildCache => &self.rebuild_cache,
            RemediationType::RepairDatastore => &self.repair_datastore,
            RemediationType::RecoverData => &self.recover_data,
        };
        command.as_deref().filter(|c| !c.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComponentSpec {
    pub id: String,
    pub probe: ProbeSpec,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub remediation: RemediationCommands,
    /// Always use this remediation for the component
    #[serde(default)]
    pub remediation_override: Option<RemediationType>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProtocolSpec {
    pub id: String,
    pub resource: ResourceKind,
    pub threshold_percent: f64,
    #[serde(default)]
    pub sustained_secs: u64,
    #[serde(default = "default_containment_cooldown")]
    pub cooldown_secs: u64,
    pub actions: Vec<ContainmentAction>,
    #[serde(default = "default_max_offenders")]
    pub max_offenders: usize,
    #[serde(default)]
    pub allow_terminate: bool,
    #[serde(default = "default_terminate_limit")]
    pub terminate_limit: usize,
}

impl ProtocolSpec {
    pub fn to_protocol(&self) -> ContainmentProtocol {
        let protocol = ContainmentProtocol::new(
            &self.id,
            ContainmentTrigger {
                resource: self.resource,
                threshold_percent: self.threshold_percent,
                sustained: Duration::from_secs(self.sustained_secs),
            },
            self.actions.clone(),
        )
        .with_cooldown(Duration::from_secs(self.cooldown_secs))
        .with_max_offenders(self.max_offenders);

        if self.allow_terminate {
            protocol.allowing_terminate(self.terminate_limit)
        } else {
            protocol
        }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HealerConfig {
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics/status
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_probe_interval")]
    pub probe_interval_secs: u64,

    #[serde(default = "default_deep_probe_interval")]
    pub deep_probe_interval_secs: u64,

    #[serde(default = "default_healing_interval")]
    pub healing_interval_secs: u64,

    #[serde(default = "default_max_components_per_cycle")]
    pub max_components_per_cycle: usize,

    #[serde(default = "default_max_actions_per_cycle")]
    pub max_actions_per_cycle: usize,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    #[serde(default = "default_remediation_timeout")]
    pub remediation_timeout_secs: u64,

    #[serde(default = "default_loop_window")]
    pub loop_window_secs: u64,

    #[serde(default = "default_loop_threshold")]
    pub loop_threshold: usize,

    #[serde(default = "default_escalation_delay")]
    pub escalation_delay_secs: u64,

    #[serde(default = "default_anomaly_history_cap")]
    pub anomaly_history_cap: usize,

    #[serde(default = "default_action_history_cap")]
    pub action_history_cap: usize,

    #[serde(default = "default_action_retention")]
    pub action_retention_secs: u64,

    #[serde(default = "default_error_window_cap")]
    pub error_window_cap: usize,

    #[serde(default = "default_sample_interval")]
    pub sample_interval_secs: u64,

    #[serde(default = "default_resource_threshold")]
    pub resource_threshold_percent: f64,

    #[serde(default = "default_min_uptime")]
    pub min_uptime_secs: u64,

    #[serde(default = "default_critical_components")]
    pub critical_components: Vec<String>,

    /// Breaker applied to the built-in jobs
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,

    #[serde(default = "default_breaker_success_threshold")]
    pub breaker_success_threshold: u32,

    #[serde(default = "default_breaker_cooldown")]
    pub breaker_cooldown_secs: u64,

    /// Root of the proc filesystem sampled for host metrics
    #[serde(default = "default_proc_path")]
    pub proc_path: PathBuf,

    /// cgroup v2 mount used to isolate workloads
    #[serde(default = "default_cgroup_root")]
    pub cgroup_root: PathBuf,

    /// `cpu.max` applied to the isolation group
    #[serde(default = "default_isolation_cpu_max")]
    pub isolation_cpu_max: Option<String>,

    /// Hook run for the scale-down containment action
    #[serde(default)]
    pub scale_down_command: Option<Vec<String>>,

    #[serde(default)]
    pub components: Vec<ComponentSpec>,

    #[serde(default)]
    pub containment: Vec<ProtocolSpec>,
}

fn default_node_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_probe_interval() -> u64 {
    15
}

fn default_deep_probe_interval() -> u64 {
    300
}

fn default_healing_interval() -> u64 {
    30
}

fn default_max_components_per_cycle() -> usize {
    8
}

fn default_max_actions_per_cycle() -> usize {
    5
}

fn default_probe_timeout_ms() -> u64 {
    5000
}

fn default_remediation_timeout() -> u64 {
    30
}

fn default_loop_window() -> u64 {
    300
}

fn default_loop_threshold() -> usize {
    3
}

fn default_escalation_delay() -> u64 {
    120
}

fn default_anomaly_history_cap() -> usize {
    500
}

fn default_action_history_cap() -> usize {
    200
}

fn default_action_retention() -> u64 {
    24 * 60 * 60
}

fn default_error_window_cap() -> usize {
    256
}

fn default_sample_interval() -> u64 {
    5
}

fn default_resource_threshold() -> f64 {
    90.0
}

fn default_min_uptime() -> u64 {
    60
}

fn default_critical_components() -> Vec<String> {
    DEFAULT_CRITICAL_COMPONENTS
        .iter()
        .map(|c| c.to_string())
        .collect()
}

fn default_breaker_failure_threshold() -> u32 {
    3
}

fn default_breaker_success_threshold() -> u32 {
    2
}

fn default_breaker_cooldown() -> u64 {
    30
}

fn default_proc_path() -> PathBuf {
    PathBuf::from("/proc")
}

fn default_cgroup_root() -> PathBuf {
    PathBuf::from("/sys/fs/cgroup")
}

fn default_isolation_cpu_max() -> Option<String> {
    Some("50000 100000".to_string())
}

fn default_containment_cooldown() -> u64 {
    300
}

fn default_max_offenders() -> usize {
    3
}

fn default_terminate_limit() -> usize {
    1
}

impl HealerConfig {
    /// Load configuration from `HEALER_CONFIG` and the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("HEALER_CONFIG").ok().map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("HEALER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("critical_components"),
        );

        let config: HealerConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.loop_threshold == 0 {
            bail!("loop_threshold must be at least 1");
        }
        if self.max_components_per_cycle == 0 {
            bail!("max_components_per_cycle must be at least 1");
        }
        for (name, secs) in [
            ("probe_interval_secs", self.probe_interval_secs),
            ("deep_probe_interval_secs", self.deep_probe_interval_secs),
            ("healing_interval_secs", self.healing_interval_secs),
            ("sample_interval_secs", self.sample_interval_secs),
            ("remediation_timeout_secs", self.remediation_timeout_secs),
        ] {
            if secs == 0 {
                bail!("{} must be at least 1", name);
            }
        }
        let mut seen = std::collections::HashSet::new();
        for component in &self.components {
            if !seen.insert(component.id.as_str()) {
                bail!("component {} configured twice", component.id);
            }
        }
        Ok(())
    }

    pub fn to_control_plane_config(&self) -> ControlPlaneConfig {
        let remediation_overrides: HashMap<String, RemediationType> = self
            .components
            .iter()
            .filter_map(|c| c.remediation_override.map(|r| (c.id.clone(), r)))
            .collect();

        ControlPlaneConfig {
            node_name: self.node_name.clone(),
            health: HealthMonitorConfig {
                probe_interval: Duration::from_secs(self.probe_interval_secs),
                deep_probe_interval: Duration::from_secs(self.deep_probe_interval_secs),
                max_components_per_cycle: self.max_components_per_cycle,
                probe_timeout: Duration::from_millis(self.probe_timeout_ms),
                min_uptime: Duration::from_secs(self.min_uptime_secs),
                resource_threshold_percent: self.resource_threshold_percent,
                ..Default::default()
            },
            healing: HealingConfig {
                max_actions_per_cycle: self.max_actions_per_cycle,
                loop_window: Duration::from_secs(self.loop_window_secs),
                loop_threshold: self.loop_threshold,
                escalation_delay: Duration::from_secs(self.escalation_delay_secs),
                remediation_timeout: Duration::from_secs(self.remediation_timeout_secs),
                action_history_cap: self.action_history_cap,
                action_retention: Duration::from_secs(self.action_retention_secs),
                error_window_cap: self.error_window_cap,
                remediation_overrides,
            },
            suppression: SuppressionConfig {
                critical_components: self.critical_components.iter().cloned().collect(),
            },
            sampler: SamplerConfig {
                interval: Duration::from_secs(self.sample_interval_secs),
                ..Default::default()
            },
            anomalies: AnomalyStoreConfig {
                capacity: self.anomaly_history_cap,
                ..Default::default()
            },
            healing_interval: Duration::from_secs(self.healing_interval_secs),
            task_breaker: CircuitBreakerConfig {
                failure_threshold: self.breaker_failure_threshold,
                success_threshold: self.breaker_success_threshold,
                cooldown: Duration::from_secs(self.breaker_cooldown_secs),
            },
            ..Default::default()
        }
    }
}
