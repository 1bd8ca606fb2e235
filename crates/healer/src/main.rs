//! healerd - self-healing control plane daemon
//!
//! Probes the configured components, heals them through configured
//! commands, contains runaway workloads and serves the status API.

use anyhow::{Context, Result};
use healer_lib::{
    api::{self, AppState},
    sampler::ProcMetricsSource,
    ControlPlane,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod config;
mod containment;
mod probes;
mod remediation;

use config::HealerConfig;
use containment::CgroupWorkloadController;
use remediation::CommandRemediator;

// All control-plane steps share one thread and interleave at await points
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting healerd");

    let config = HealerConfig::load().context("Failed to load configuration")?;
    info!(
        node_name = %config.node_name,
        components = config.components.len(),
        protocols = config.containment.len(),
        "Daemon configured"
    );

    let plane = Arc::new(build_control_plane(&config).await?);
    plane.start().await;

    let (api_stop_tx, api_stop_rx) = oneshot::channel::<()>();
    let addr = SocketAddr::from(([0, 0, 0, 0], config.api_port));
    let state = Arc::new(AppState::new(plane.clone()));
    let api_handle = tokio::spawn(api::serve(addr, state, async move {
        // A dropped sender also stops the server
        let _ = api_stop_rx.await;
    }));

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    plane.shutdown("SIGINT received").await;
    let _ = api_stop_tx.send(());
    match api_handle.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(error = %e, "API server failed"),
        Err(e) => error!(error = %e, "API server task panicked"),
    }

    Ok(())
}

async fn build_control_plane(config: &HealerConfig) -> Result<ControlPlane> {
    let probe_timeout = Duration::from_millis(config.probe_timeout_ms);
    let mut builder = ControlPlane::builder(config.to_control_plane_config());

    let mut commands = HashMap::new();
    for component in &config.components {
        let probe = probes::build_probe(&component.probe, probe_timeout)
            .with_context(|| format!("Invalid probe for component {}", component.id))?;
        let depends_on: Vec<&str> = component.depends_on.iter().map(String::as_str).collect();
        builder = builder.component(&component.id, probe, &depends_on);
        commands.insert(component.id.clone(), component.remediation.clone());
    }

    builder = builder
        .remediator(Arc::new(CommandRemediator::new(commands)))
        .metrics_source(Arc::new(ProcMetricsSource::with_proc_path(&config.proc_path)));

    if !config.containment.is_empty() {
        let controller = CgroupWorkloadController::new(&config.cgroup_root)
            .with_proc_path(&config.proc_path)
            .with_cpu_max(config.isolation_cpu_max.clone())
            .with_scale_down_command(config.scale_down_command.clone());
        builder = builder.workload_controller(Arc::new(controller));
        for protocol in &config.containment {
            builder = builder.containment_protocol(protocol.to_protocol());
        }
    }

    Ok(builder.build().await?)
}
