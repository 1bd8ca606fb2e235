//! Metrics sampling loop
//!
//! Periodically reads a [`ResourceSample`] from the configured source,
//! records it in the shared history and publishes it to subscribers.

use super::{MetricsSource, SampleHistory};
use crate::models::ResourceSample;
use crate::observability::HealerMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Shortest interval the sampler runs at
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration for the sampling loop
#[derive(Debug, Clone)]
pub struct SamplerConfig {
    /// Interval between samples (default: 5 seconds)
    pub interval: Duration,
    /// Number of samples kept for trailing averages
    pub history_size: usize,
    /// Broadcast channel capacity for sample subscribers
    pub channel_capacity: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            history_size: super::history::DEFAULT_HISTORY_SIZE,
            channel_capacity: 64,
        }
    }
}

/// Sampling loop feeding containment and the orchestrator's lazy gate
pub struct SamplerLoop {
    source: Arc<dyn MetricsSource>,
    history: Arc<SampleHistory>,
    config: SamplerConfig,
    samples_tx: broadcast::Sender<ResourceSample>,
    metrics: HealerMetrics,
}

impl SamplerLoop {
    pub fn new(
        source: Arc<dyn MetricsSource>,
        history: Arc<SampleHistory>,
        mut config: SamplerConfig,
        metrics: HealerMetrics,
    ) -> Self {
        if config.interval < MIN_SAMPLE_INTERVAL {
            warn!(
                interval_ms = config.interval.as_millis() as u64,
                "Sample interval too short, using minimum"
            );
            config.interval = MIN_SAMPLE_INTERVAL;
        }
        let (samples_tx, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            source,
            history,
            config,
            samples_tx,
            metrics,
        }
    }

    /// Subscribe to samples published by this loop
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceSample> {
        self.samples_tx.subscribe()
    }

    pub fn history(&self) -> Arc<SampleHistory> {
        self.history.clone()
    }

    /// Take one sample, record and publish it
    ///
    /// Sampling errors are logged and counted; they never stop the loop.
    pub async fn sample_once(&self) -> Option<ResourceSample> {
        match self.source.sample().await {
            Ok(sample) => {
                self.metrics
                    .set_host_usage(sample.cpu_percent, sample.memory_percent);
                self.history.push(sample.clone()).await;
                // No receivers is fine, containment may be disabled
                let _ = self.samples_tx.send(sample.clone());
                debug!(
                    cpu_percent = sample.cpu_percent,
                    memory_percent = sample.memory_percent,
                    processes = sample.total_processes,
                    "Resource sample recorded"
                );
                Some(sample)
            }
            Err(e) => {
                self.metrics.inc_sample_errors();
                warn!(error = %e, "Failed to sample host metrics");
                None
            }
        }
    }

    /// Run until a shutdown signal is received
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            "Starting metrics sampler"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sample_once().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down metrics sampler");
                    break;
                }
            }
        }
    }
}
