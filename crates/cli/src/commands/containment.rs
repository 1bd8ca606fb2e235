//! Containment commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, ContainmentStatus};
use crate::output::{
    format_optional_timestamp, format_percent, format_timestamp, print_json, print_rows,
    print_section, yes_no, OutputFormat,
};

#[derive(Tabled)]
struct ProtocolRow {
    #[tabled(rename = "Protocol")]
    id: String,
    #[tabled(rename = "Trigger")]
    trigger: String,
    #[tabled(rename = "Actions")]
    actions: String,
    #[tabled(rename = "Triggered")]
    trigger_count: u64,
    #[tabled(rename = "Last")]
    last_triggered: String,
    #[tabled(rename = "Cooldown")]
    in_cooldown: String,
}

#[derive(Tabled)]
struct IsolatedRow {
    #[tabled(rename = "PID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Protocol")]
    protocol: String,
    #[tabled(rename = "Isolated")]
    isolated_at: String,
}

#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "Time")]
    triggered_at: String,
    #[tabled(rename = "Protocol")]
    protocol: String,
    #[tabled(rename = "Usage")]
    usage: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
}

/// Show containment protocols, isolated workloads and recent triggers
pub async fn show_containment(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: ContainmentStatus = client.get("api/v1/containment").await?;

    if let OutputFormat::Json = format {
        return print_json(&status);
    }

    print_section("Protocols");
    let protocols = status
        .protocols
        .iter()
        .map(|p| ProtocolRow {
            id: p.id.clone(),
            trigger: format!(
                "{} > {} for {}s",
                p.resource,
                format_percent(p.threshold_percent),
                p.sustained_secs
            ),
            actions: p.actions.join(", "),
            trigger_count: p.trigger_count,
            last_triggered: format_optional_timestamp(p.last_triggered_at),
            in_cooldown: yes_no(p.in_cooldown),
        })
        .collect();
    print_rows(protocols, "No containment protocols configured");

    print_section("Isolated workloads");
    let isolated = status
        .isolated
        .iter()
        .map(|w| IsolatedRow {
            id: w.id.clone(),
            name: w.name.clone(),
            protocol: w.protocol_id.clone(),
            isolated_at: format_timestamp(w.isolated_at),
        })
        .collect();
    print_rows(isolated, "No workloads isolated");

    print_section("Recent events");
    let events = status
        .recent_events
        .iter()
        .map(|e| {
            let failed = e.actions.iter().filter(|a| !a.ok).count();
            EventRow {
                triggered_at: format_timestamp(e.triggered_at),
                protocol: e.protocol_id.clone(),
                usage: format!("{} {}", e.resource, format_percent(e.usage_percent)),
                outcome: format!("{} actions, {} failed", e.actions.len(), failed),
            }
        })
        .collect();
    print_rows(events, "No containment events");

    Ok(())
}
