//! Healing action lifecycle

use crate::error::HealerError;
use crate::models::{next_id, unix_now, ActionStatus, AnomalyType, RemediationType, Severity};
use serde::{Deserialize, Serialize};

/// A tracked remediation attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingAction {
    pub id: String,
    pub remediation: RemediationType,
    pub target: String,
    pub severity: Severity,
    pub status: ActionStatus,
    /// Confidence in `[0, 1]` that the chosen remediation fits the fault
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly_type: Option<AnomalyType>,
    pub detected_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

impl HealingAction {
    pub fn new(target: impl Into<String>, remediation: RemediationType, severity: Severity) -> Self {
        Self {
            id: next_id("heal"),
            remediation,
            target: target.into(),
            severity,
            status: ActionStatus::Analyzing,
            confidence: confidence_for(severity),
            anomaly_id: None,
            anomaly_type: None,
            detected_at: unix_now(),
            completed_at: None,
            result: None,
        }
    }

    pub fn with_anomaly(mut self, anomaly_id: impl Into<String>, anomaly_type: AnomalyType) -> Self {
        self.anomaly_id = Some(anomaly_id.into());
        self.anomaly_type = Some(anomaly_type);
        self
    }

    /// `analyzing -> repairing`
    pub fn begin_repair(&mut self) -> Result<(), HealerError> {
        self.transition(ActionStatus::Repairing, None)
    }

    /// `repairing -> completed`
    pub fn complete(&mut self, result: impl Into<String>) -> Result<(), HealerError> {
        self.transition(ActionStatus::Completed, Some(result.into()))
    }

    /// `analyzing | repairing -> failed`
    pub fn fail(&mut self, result: impl Into<String>) -> Result<(), HealerError> {
        self.transition(ActionStatus::Failed, Some(result.into()))
    }

    fn transition(&mut self, next: ActionStatus, result: Option<String>) -> Result<(), HealerError> {
        let allowed = matches!(
            (self.status, next),
            (ActionStatus::Analyzing, ActionStatus::Repairing)
                | (ActionStatus::Analyzing, ActionStatus::Failed)
                | (ActionStatus::Repairing, ActionStatus::Completed)
                | (ActionStatus::Repairing, ActionStatus::Failed)
        );
        if !allowed {
            return Err(HealerError::InvalidTransition {
                action: self.id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }

        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(unix_now());
        }
        if result.is_some() {
            self.result = result;
        }
        Ok(())
    }
}

fn confidence_for(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 0.9,
        Severity::High => 0.75,
        Severity::Medium => 0.6,
        Severity::Low => 0.5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() {
        let mut action = HealingAction::new("cache", RemediationType::RebuildCache, Severity::High);
        assert_eq!(action.status, ActionStatus::Analyzing);
        assert!(action.id.starts_with("heal-"));

        action.begin_repair().unwrap();
        action.complete("cache rebuilt").unwrap();
        assert_eq!(action.status, ActionStatus::Completed);
        assert_eq!(action.result.as_deref(), Some("cache rebuilt"));
        assert!(action.completed_at.is_some());
    }

    #[test]
    fn test_fail_directly_from_analyzing() {
        let mut action = HealingAction::new("cache", RemediationType::RestartService, Severity::Critical);
        action.fail("suppressed").unwrap();
        assert_eq!(action.status, ActionStatus::Failed);
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let mut action = HealingAction::new("db", RemediationType::RepairDatastore, Severity::Low);
        assert!(matches!(
            action.complete("too early"),
            Err(HealerError::InvalidTransition { .. })
        ));

        action.fail("gave up").unwrap();
        assert!(action.begin_repair().is_err());
        assert!(action.fail("again").is_err());
        assert_eq!(action.result.as_deref(), Some("gave up"));
    }
}
