//! Bounded history of recent samples

use crate::models::ResourceSample;
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// Default number of samples kept for trailing averages
pub const DEFAULT_HISTORY_SIZE: usize = 12;

/// Rolling window of the most recent resource samples
#[derive(Debug)]
pub struct SampleHistory {
    samples: RwLock<VecDeque<ResourceSample>>,
    capacity: usize,
}

impl Default for SampleHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_SIZE)
    }
}

impl SampleHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Add a sample, evicting the oldest once at capacity
    pub async fn push(&self, sample: ResourceSample) {
        let mut samples = self.samples.write().await;
        while samples.len() >= self.capacity {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    /// Trailing CPU average over the window, `None` before the first sample
    pub async fn cpu_average(&self) -> Option<f64> {
        let samples = self.samples.read().await;
        if samples.is_empty() {
            return None;
        }
        let sum: f64 = samples.iter().map(|s| s.cpu_percent).sum();
        Some(sum / samples.len() as f64)
    }

    pub async fn latest(&self) -> Option<ResourceSample> {
        self.samples.read().await.back().cloned()
    }

    pub async fn len(&self) -> usize {
        self.samples.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.samples.read().await.is_empty()
    }
}
