//! Bounded anomaly report buffer
//!
//! Reports are kept in arrival order. Past the capacity the oldest report is
//! evicted regardless of its resolved flag.

use crate::models::{unix_now, AnomalyReport, AnomalyType, Severity};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::RwLock;

/// Default maximum number of reports kept (500 entries)
const DEFAULT_CAPACITY: usize = 500;

/// Default age after which resolved reports are dropped (1 hour)
const DEFAULT_RESOLVED_RETENTION: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct AnomalyStoreConfig {
    pub capacity: usize,
    pub resolved_retention: Duration,
}

impl Default for AnomalyStoreConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            resolved_retention: DEFAULT_RESOLVED_RETENTION,
        }
    }
}

/// Ring buffer of anomaly reports
#[derive(Debug)]
pub struct AnomalyStore {
    reports: RwLock<VecDeque<AnomalyReport>>,
    config: AnomalyStoreConfig,
}

impl Default for AnomalyStore {
    fn default() -> Self {
        Self::new(AnomalyStoreConfig::default())
    }
}

impl AnomalyStore {
    pub fn new(config: AnomalyStoreConfig) -> Self {
        let config = AnomalyStoreConfig {
            capacity: config.capacity.max(1),
            ..config
        };
        Self {
            reports: RwLock::new(VecDeque::with_capacity(config.capacity.min(1_000))),
            config,
        }
    }

    pub fn config(&self) -> &AnomalyStoreConfig {
        &self.config
    }

    /// Append a report unless an unresolved one with the same component and
    /// type is already open. A more severe duplicate raises the open report's
    /// severity and description in place, keeping its id and age.
    ///
    /// Returns whether the report was stored or raised an open one.
    pub async fn record(&self, report: AnomalyReport) -> bool {
        let mut reports = self.reports.write().await;

        let open = reports.iter_mut().find(|r| {
            !r.resolved && r.component == report.component && r.anomaly_type == report.anomaly_type
        });
        if let Some(open) = open {
            if report.severity <= open.severity {
                return false;
            }
            open.severity = report.severity;
            open.description = report.description;
            return true;
        }

        while reports.len() >= self.config.capacity {
            reports.pop_front();
        }
        reports.push_back(report);
        true
    }

    /// Every stored report, oldest first
    pub async fn all(&self) -> Vec<AnomalyReport> {
        self.reports.read().await.iter().cloned().collect()
    }

    /// Unresolved reports, oldest first
    pub async fn unresolved(&self) -> Vec<AnomalyReport> {
        self.reports
            .read()
            .await
            .iter()
            .filter(|r| !r.resolved)
            .cloned()
            .collect()
    }

    /// Unresolved reports at or above `min`, oldest first
    pub async fn unresolved_at_least(&self, min: Severity) -> Vec<AnomalyReport> {
        self.reports
            .read()
            .await
            .iter()
            .filter(|r| !r.resolved && r.severity >= min)
            .cloned()
            .collect()
    }

    pub async fn unresolved_for(&self, component: &str) -> Vec<AnomalyReport> {
        self.reports
            .read()
            .await
            .iter()
            .filter(|r| !r.resolved && r.component == component)
            .cloned()
            .collect()
    }

    /// Resolve every open report for a component
    pub async fn resolve_component(&self, component: &str) -> usize {
        self.resolve_component_except(component, &[]).await
    }

    /// Resolve open reports for a component, keeping the listed types open
    pub async fn resolve_component_except(&self, component: &str, keep: &[AnomalyType]) -> usize {
        let mut reports = self.reports.write().await;
        let mut resolved = 0;
        for report in reports.iter_mut() {
            if !report.resolved && report.component == component && !keep.contains(&report.anomaly_type) {
                report.resolved = true;
                resolved += 1;
            }
        }
        resolved
    }

    /// Drop resolved reports older than the configured retention
    pub async fn evict_resolved(&self) -> usize {
        let cutoff = unix_now() - self.config.resolved_retention.as_secs() as i64;
        let mut reports = self.reports.write().await;
        let before = reports.len();
        reports.retain(|r| !r.resolved || r.detected_at > cutoff);
        before - reports.len()
    }

    pub async fn len(&self) -> usize {
        self.reports.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.reports.read().await.is_empty()
    }
}
