//! Probe interface implemented by the host for each monitored component

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Result of probing a component
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeOutcome {
    pub healthy: bool,
    #[serde(default)]
    pub metrics: HashMap<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProbeOutcome {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            ..Default::default()
        }
    }

    /// The component answered and reported itself unhealthy or disconnected
    pub fn unhealthy(error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            metrics: HashMap::new(),
            error: Some(error.into()),
        }
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metrics.insert(key.into(), value.into());
        self
    }
}

/// Component-specific health probe
///
/// `Err` means the probe itself could not run; the monitor then records the
/// component as `unknown`. An `Ok` outcome with `healthy == false` is the
/// signal that escalates the component to `critical`.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self) -> Result<ProbeOutcome>;

    /// Expensive check run on the deep cycle
    async fn deep_probe(&self) -> Result<ProbeOutcome> {
        self.probe().await
    }
}
