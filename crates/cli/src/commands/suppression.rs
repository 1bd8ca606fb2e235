//! Dependency suppression commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, SuppressionSnapshot};
use crate::output::{color_status, print_json, print_rows, yes_no, OutputFormat};

#[derive(Tabled)]
struct SuppressionRow {
    #[tabled(rename = "Component")]
    component: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Critical")]
    critical: String,
    #[tabled(rename = "Depends On")]
    depends_on: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

fn suppression_rows(snapshot: &SuppressionSnapshot) -> Vec<SuppressionRow> {
    snapshot
        .states
        .iter()
        .map(|(component, state)| SuppressionRow {
            component: component.clone(),
            state: color_status(state),
            critical: yes_no(snapshot.critical_components.contains(component)),
            depends_on: snapshot
                .dependencies
                .get(component)
                .map(|deps| deps.join(", "))
                .unwrap_or_default(),
            reason: snapshot.reasons.get(component).cloned().unwrap_or_default(),
        })
        .collect()
}

/// Show global component states and suppression reasons
pub async fn show_suppression(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let snapshot: SuppressionSnapshot = client.get("api/v1/suppression").await?;

    match format {
        OutputFormat::Json => print_json(&snapshot)?,
        OutputFormat::Table => print_rows(suppression_rows(&snapshot), "No components registered"),
    }

    Ok(())
}
