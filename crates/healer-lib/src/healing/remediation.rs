//! Remediation routines supplied by the host

use crate::models::RemediationType;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationOutcome {
    pub ok: bool,
    pub detail: String,
}

impl RemediationOutcome {
    pub fn ok(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: detail.into(),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: detail.into(),
        }
    }
}

/// Executes a remediation against a component
///
/// An `Err` is treated exactly like `ok: false`.
#[async_trait]
pub trait Remediator: Send + Sync {
    async fn remediate(&self, remediation: RemediationType, target: &str) -> Result<RemediationOutcome>;
}
