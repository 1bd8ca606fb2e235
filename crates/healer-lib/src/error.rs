//! Typed errors for the control plane

use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by control-plane operations
#[derive(Debug, Error)]
pub enum HealerError {
    #[error("unknown task: {0}")]
    UnknownTask(String),

    #[error("unknown component: {0}")]
    UnknownComponent(String),

    #[error("invalid recurrence expression '{expr}': {reason}")]
    InvalidRecurrence { expr: String, reason: String },

    #[error("invalid component state: {0}")]
    InvalidState(String),

    #[error("healing action {action} cannot move from {from} to {to}")]
    InvalidTransition {
        action: String,
        from: String,
        to: String,
    },

    #[error("probe for {component} timed out after {timeout:?}")]
    ProbeTimeout {
        component: String,
        timeout: Duration,
    },

    #[error("{action} on {target} timed out after {timeout:?}")]
    RemediationTimeout {
        action: String,
        target: String,
        timeout: Duration,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

pub type Result<T, E = HealerError> = std::result::Result<T, E>;
