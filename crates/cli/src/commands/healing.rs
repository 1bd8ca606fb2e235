//! Anomaly, healing action and override commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{AnomalyReport, ApiClient, HealingAction, OverrideRequest, OverrideResponse};
use crate::output::{
    color_status, format_optional_timestamp, format_timestamp, print_json, print_rows,
    print_success, OutputFormat,
};

#[derive(Tabled)]
struct AnomalyRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Component")]
    component: String,
    #[tabled(rename = "Type")]
    anomaly_type: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Detected")]
    detected_at: String,
    #[tabled(rename = "Resolved")]
    resolved: String,
    #[tabled(rename = "Description")]
    description: String,
}

#[derive(Tabled)]
struct ActionRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Target")]
    target: String,
    #[tabled(rename = "Remediation")]
    remediation: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Confidence")]
    confidence: String,
    #[tabled(rename = "Detected")]
    detected_at: String,
    #[tabled(rename = "Completed")]
    completed_at: String,
    #[tabled(rename = "Result")]
    result: String,
}

/// List anomaly reports, unresolved only unless `all`
pub async fn list_anomalies(client: &ApiClient, all: bool, format: OutputFormat) -> Result<()> {
    let path = if all {
        "api/v1/anomalies?all=true"
    } else {
        "api/v1/anomalies"
    };
    let anomalies: Vec<AnomalyReport> = client.get(path).await?;

    match format {
        OutputFormat::Json => print_json(&anomalies)?,
        OutputFormat::Table => {
            let rows = anomalies
                .iter()
                .map(|a| AnomalyRow {
                    id: a.id.clone(),
                    component: a.component.clone(),
                    anomaly_type: a.anomaly_type.clone(),
                    severity: color_status(&a.severity),
                    detected_at: format_timestamp(a.detected_at),
                    resolved: if a.resolved { "yes" } else { "no" }.to_string(),
                    description: a.description.clone(),
                })
                .collect();
            print_rows(rows, "No anomalies");
        }
    }

    Ok(())
}

/// List recent healing actions, newest first
pub async fn list_actions(client: &ApiClient, limit: usize, format: OutputFormat) -> Result<()> {
    let path = format!("api/v1/actions?limit={}", limit);
    let actions: Vec<HealingAction> = client.get(&path).await?;

    match format {
        OutputFormat::Json => print_json(&actions)?,
        OutputFormat::Table => {
            let rows = actions
                .iter()
                .map(|a| ActionRow {
                    id: a.id.clone(),
                    target: a.target.clone(),
                    remediation: a.remediation.clone(),
                    status: color_status(&a.status),
                    confidence: format!("{:.0}%", a.confidence * 100.0),
                    detected_at: format_timestamp(a.detected_at),
                    completed_at: format_optional_timestamp(a.completed_at),
                    result: a.result.clone().unwrap_or_default(),
                })
                .collect();
            print_rows(rows, "No healing actions recorded");
        }
    }

    Ok(())
}

/// Force a component into the given state
pub async fn override_state(
    client: &ApiClient,
    component: &str,
    state: &str,
    format: OutputFormat,
) -> Result<()> {
    let request = OverrideRequest {
        component: component.to_string(),
        state: state.to_string(),
    };
    let response: OverrideResponse = client.post("api/v1/override", &request).await?;

    match format {
        OutputFormat::Json => print_json(&response)?,
        OutputFormat::Table => print_success(&format!(
            "{}: {} -> {}",
            response.component,
            color_status(&response.previous),
            color_status(&response.state)
        )),
    }

    Ok(())
}
