//! Command-line remediation routines

use crate::config::RemediationCommands;
use anyhow::{Context, Result};
use async_trait::async_trait;
use healer_lib::{
    healing::{RemediationOutcome, Remediator},
    RemediationType,
};
use std::collections::HashMap;
use tokio::process::Command;
use tracing::debug;

/// Runs the configured command for a (component, remediation) pair
///
/// The target component is passed to the command as `HEALER_COMPONENT` and
/// the remediation type as `HEALER_REMEDIATION`.
pub struct CommandRemediator {
    commands: HashMap<String, RemediationCommands>,
}

impl CommandRemediator {
    pub fn new(commands: HashMap<String, RemediationCommands>) -> Self {
        Self { commands }
    }
}

#[async_trait]
impl Remediator for CommandRemediator {
    async fn remediate(&self, remediation: RemediationType, target: &str) -> Result<RemediationOutcome> {
        let Some(command) = self
            .commands
            .get(target)
            .and_then(|c| c.command_for(remediation))
        else {
            return Ok(RemediationOutcome::failed(format!(
                "no {} command configured for {}",
                remediation, target
            )));
        };

        let (program, args) = command
            .split_first()
            .context("empty remediation command")?;
        debug!(component = %target, remediation = %remediation, program = %program, "Running remediation");

        let output = Command::new(program)
            .args(args)
            .env("HEALER_COMPONENT", target)
            .env("HEALER_REMEDIATION", remediation.to_string())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to run remediation command {}", program))?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if output.status.success() {
            let detail = if stdout.is_empty() {
                format!("{} completed for {}", remediation, target)
            } else {
                stdout
            };
            Ok(RemediationOutcome::ok(detail))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let detail = if stderr.is_empty() {
                format!("{} exited with {}", program, output.status)
            } else {
                stderr
            };
            Ok(RemediationOutcome::failed(detail))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remediator(restart: &str) -> CommandRemediator {
        let commands = RemediationCommands {
            restart_service: Some(vec!["sh".into(), "-c".into(), restart.into()]),
            ..Default::default()
        };
        CommandRemediator::new(HashMap::from([("cache".to_string(), commands)]))
    }

    #[tokio::test]
    async fn test_successful_command() {
        let outcome = remediator("echo restarted $HEALER_COMPONENT")
            .remediate(RemediationType::RestartService, "cache")
            .await
            .unwrap();
        assert!(outcome.ok);
        assert_eq!(outcome.detail, "restarted cache");
    }

    #[tokio::test]
    async fn test_failing_command() {
        let outcome = remediator("echo unit not found >&2; exit 5")
            .remediate(RemediationType::RestartService, "cache")
            .await
            .unwrap();
        assert!(!outcome.ok);
        assert_eq!(outcome.detail, "unit not found");
    }

    #[tokio::test]
    async fn test_missing_command_fails_action() {
        let remediator = remediator("true");
        let outcome = remediator
            .remediate(RemediationType::RebuildCache, "cache")
            .await
            .unwrap();
        assert!(!outcome.ok);
        assert!(outcome.detail.contains("rebuild_cache"));

        let outcome = remediator
            .remediate(RemediationType::RestartService, "server")
            .await
            .unwrap();
        assert!(!outcome.ok);
    }
}
