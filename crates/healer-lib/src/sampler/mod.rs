//! Host metrics sampling
//!
//! Periodically reads CPU, memory and process counts from the host and
//! fans the resulting [`ResourceSample`]s out to the containment manager
//! (via broadcast) and the task orchestrator's lazy gate (via
//! [`SampleHistory`]).

mod history;
mod procfs;
mod r#loop;

#[cfg(test)]
mod tests;

pub use history::SampleHistory;
pub use procfs::ProcMetricsSource;
pub use r#loop::{SamplerConfig, SamplerLoop};

use crate::models::ResourceSample;
use anyhow::Result;
use async_trait::async_trait;

/// Host-supplied source of system metrics
///
/// Implementations must not block the scheduler thread.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn sample(&self) -> Result<ResourceSample>;
}
