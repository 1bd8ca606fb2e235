//! Node status, component health and scheduled task commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, ComponentHealth, OrchestratorStatus, StatusReport};
use crate::output::{
    color_integrity, color_status, format_optional_timestamp, format_percent, print_info,
    print_json, print_rows, print_section, print_warning, yes_no, OutputFormat,
};

#[derive(Tabled)]
struct ComponentRow {
    #[tabled(rename = "Component")]
    component: String,
    #[tabled(rename = "State")]
    status: String,
    #[tabled(rename = "Integrity")]
    integrity: String,
    #[tabled(rename = "Last Probe")]
    last_probe: String,
    #[tabled(rename = "Message")]
    message: String,
}

impl From<&ComponentHealth> for ComponentRow {
    fn from(c: &ComponentHealth) -> Self {
        let mut message = c.message.clone().unwrap_or_default();
        if let Some(suppression) = &c.loop_suppression {
            if !message.is_empty() {
                message.push_str("; ");
            }
            message.push_str(&format!(
                "loop: {} x{}",
                suppression.signature, suppression.count
            ));
        }
        Self {
            component: c.component.clone(),
            status: color_status(&c.status),
            integrity: color_integrity(c.integrity_score),
            last_probe: format_optional_timestamp(c.last_probe_at),
            message,
        }
    }
}

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "Task")]
    id: String,
    #[tabled(rename = "Recurrence")]
    recurrence: String,
    #[tabled(rename = "Prio")]
    priority: u8,
    #[tabled(rename = "Runs")]
    runs: u64,
    #[tabled(rename = "Failures")]
    failures: u64,
    #[tabled(rename = "Skipped")]
    skipped: String,
    #[tabled(rename = "Breaker")]
    breaker: String,
    #[tabled(rename = "Last Run")]
    last_run: String,
}

fn task_rows(status: &OrchestratorStatus) -> Vec<TaskRow> {
    status
        .tasks
        .iter()
        .map(|t| TaskRow {
            id: t.id.clone(),
            recurrence: t.recurrence.clone(),
            priority: t.priority,
            runs: t.runs,
            failures: t.failures,
            skipped: format!("{} breaker / {} cpu", t.skipped_breaker, t.skipped_cpu),
            breaker: if t.breaker.is_open {
                "open".red().to_string()
            } else {
                format!("closed ({}/{})", t.breaker.failure_count, t.breaker.failure_threshold)
            },
            last_run: format_optional_timestamp(t.last_run_at),
        })
        .collect()
}

/// Show the full node status report
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let report: StatusReport = client.get("api/v1/status").await?;

    if let OutputFormat::Json = format {
        return print_json(&report);
    }

    println!("{}", "Healer Status".bold());
    println!("{}", "=".repeat(50));
    println!("Node:      {}", report.node.cyan());
    println!("Version:   {}", report.version);
    println!("Ready:     {}", yes_no(report.ready));
    println!("Overall:   {}", color_status(&report.overall));
    if let Some(sample) = &report.latest_sample {
        println!(
            "Resources: cpu {} / memory {}",
            format_percent(sample.cpu_percent),
            format_percent(sample.memory_percent)
        );
    }

    print_section("Components");
    print_rows(
        report.components.iter().map(ComponentRow::from).collect(),
        "No components registered",
    );

    if !report.unresolved_anomalies.is_empty() {
        println!(
            "\n{} unresolved anomalies, {} recent healing actions",
            report.unresolved_anomalies.len().to_string().yellow(),
            report.recent_actions.len()
        );
    }
    if !report.pending_escalations.is_empty() {
        print_warning(&format!(
            "Escalation pending for: {}",
            report.pending_escalations.join(", ")
        ));
    }
    if !report.containment.isolated.is_empty() {
        print_warning(&format!(
            "{} workloads isolated",
            report.containment.isolated.len()
        ));
    }

    Ok(())
}

/// List component health
pub async fn show_components(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let components: Vec<ComponentHealth> = client.get("api/v1/components").await?;

    match format {
        OutputFormat::Json => print_json(&components)?,
        OutputFormat::Table => print_rows(
            components.iter().map(ComponentRow::from).collect(),
            "No components registered",
        ),
    }

    Ok(())
}

/// List scheduled control-plane tasks
pub async fn show_tasks(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: OrchestratorStatus = client.get("api/v1/tasks").await?;

    match format {
        OutputFormat::Json => print_json(&status)?,
        OutputFormat::Table => {
            if !status.running {
                print_warning("Orchestrator is not running");
            }
            if let Some(cpu) = status.cpu_average {
                print_info(&format!("Rolling CPU average: {}", format_percent(cpu)));
            }
            print_rows(task_rows(&status), "No tasks registered");
        }
    }

    Ok(())
}
