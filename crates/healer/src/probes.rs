//! Host probes for monitored components
//!
//! Connectivity failures are reported as unhealthy outcomes; only a probe
//! that cannot run at all (e.g. a missing executable) returns an error.

use crate::config::ProbeSpec;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use healer_lib::health::{Probe, ProbeOutcome};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::process::Command;

/// Build the probe described by a component's configuration
pub fn build_probe(spec: &ProbeSpec, timeout: Duration) -> Result<Arc<dyn Probe>> {
    let probe: Arc<dyn Probe> = match spec {
        ProbeSpec::Tcp { address } => Arc::new(TcpProbe::new(address)),
        ProbeSpec::Http { url } => Arc::new(HttpProbe::new(url, timeout)?),
        ProbeSpec::Command { command } => {
            if command.is_empty() {
                bail!("command probe has an empty command line");
            }
            Arc::new(CommandProbe::new(command.clone()))
        }
    };
    Ok(probe)
}

/// Merge a JSON object's fields into the outcome's metrics
fn merge_json(outcome: ProbeOutcome, body: &[u8]) -> ProbeOutcome {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(serde_json::Value::Object(fields)) => fields
            .into_iter()
            .fold(outcome, |o, (k, v)| o.with_metric(k, v)),
        _ => outcome,
    }
}

/// Healthy if a TCP connection to `address` succeeds
pub struct TcpProbe {
    address: String,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn probe(&self) -> Result<ProbeOutcome> {
        let started = Instant::now();
        match TcpStream::connect(&self.address).await {
            Ok(_) => Ok(ProbeOutcome::healthy()
                .with_metric("connect_latency_ms", started.elapsed().as_secs_f64() * 1000.0)),
            Err(e) => Ok(ProbeOutcome::unhealthy(format!(
                "connect {}: {}",
                self.address, e
            ))),
        }
    }
}

/// Healthy on a 2xx response
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self) -> Result<ProbeOutcome> {
        let started = Instant::now();
        let response = match self.client.get(&self.url).send().await {
            Ok(response) => response,
            Err(e) => return Ok(ProbeOutcome::unhealthy(format!("GET {}: {}", self.url, e))),
        };
        let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
        let status = response.status();
        let body = response.bytes().await.unwrap_or_default();

        let outcome = if status.is_success() {
            ProbeOutcome::healthy()
        } else {
            ProbeOutcome::unhealthy(format!("HTTP {}", status.as_u16()))
        };
        Ok(merge_json(outcome, &body).with_metric("latency_ms", latency_ms))
    }
}

/// Healthy if the command exits with status 0
pub struct CommandProbe {
    command: Vec<String>,
}

impl CommandProbe {
    pub fn new(command: Vec<String>) -> Self {
        Self { command }
    }
}

#[async_trait]
impl Probe for CommandProbe {
    async fn probe(&self) -> Result<ProbeOutcome> {
        let (program, args) = self
            .command
            .split_first()
            .context("command probe has an empty command line")?;
        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run probe command {}", program))?;

        let outcome = if output.status.success() {
            ProbeOutcome::healthy()
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let message = match stderr.trim() {
                "" => format!("probe command exited with {}", output.status),
                trimmed => trimmed.to_string(),
            };
            ProbeOutcome::unhealthy(message)
        };
        Ok(merge_json(outcome, &output.stdout))
    }
}
