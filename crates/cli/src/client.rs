//! API client for the healer status API
//!
//! Enum-valued fields are kept as plain strings; the CLI only displays them.

use anyhow::{Context, Result};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to reach healer API at {}", self.base_url))?;

        Self::decode(response).await
    }

    /// Make a POST request with JSON body
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("Failed to reach healer API at {}", self.base_url))?;

        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            // The API reports failures as {"error": "..."}
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            anyhow::bail!("API error ({}): {}", status, message);
        }

        response.json().await.context("Failed to parse response")
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub component: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_probe_at: Option<i64>,
    #[serde(default)]
    pub metrics: BTreeMap<String, serde_json::Value>,
    pub integrity_score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_suppression: Option<LoopSuppression>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSuppression {
    pub signature: String,
    pub count: usize,
    pub detected_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub id: String,
    pub component: String,
    pub anomaly_type: String,
    pub severity: String,
    pub description: String,
    pub detected_at: i64,
    pub resolved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealingAction {
    pub id: String,
    pub remediation: String,
    pub target: String,
    pub severity: String,
    pub status: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly_id: Option<String>,
    pub detected_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSnapshot {
    pub is_open: bool,
    pub failure_count: u32,
    pub failure_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub id: String,
    pub name: String,
    pub recurrence: String,
    pub priority: u8,
    pub scheduled: bool,
    pub breaker: BreakerSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cpu_percent: Option<f64>,
    pub runs: u64,
    pub failures: u64,
    pub skipped_breaker: u64,
    pub skipped_cpu: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub running: bool,
    #[serde(default)]
    pub cpu_average: Option<f64>,
    pub tasks: Vec<TaskStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuppressionSnapshot {
    pub states: BTreeMap<String, String>,
    pub reasons: BTreeMap<String, String>,
    pub dependencies: BTreeMap<String, Vec<String>>,
    pub critical_components: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<String>,
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainmentEvent {
    pub protocol_id: String,
    pub resource: String,
    pub usage_percent: f64,
    pub threshold_percent: f64,
    pub triggered_at: i64,
    pub actions: Vec<ActionRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolatedWorkload {
    pub id: String,
    pub name: String,
    pub protocol_id: String,
    pub isolated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolStatus {
    pub id: String,
    pub resource: String,
    pub threshold_percent: f64,
    pub sustained_secs: u64,
    pub cooldown_secs: u64,
    pub actions: Vec<String>,
    pub allow_terminate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_triggered_at: Option<i64>,
    pub trigger_count: u64,
    pub in_cooldown: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainmentStatus {
    pub protocols: Vec<ProtocolStatus>,
    pub isolated: Vec<IsolatedWorkload>,
    pub recent_events: Vec<ContainmentEvent>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub node: String,
    pub version: String,
    pub ready: bool,
    pub overall: String,
    pub components: Vec<ComponentHealth>,
    pub unresolved_anomalies: Vec<AnomalyReport>,
    pub recent_actions: Vec<HealingAction>,
    pub pending_escalations: Vec<String>,
    pub orchestrator: OrchestratorStatus,
    pub suppression: SuppressionSnapshot,
    pub containment: ContainmentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_sample: Option<ResourceSample>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideRequest {
    pub component: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideResponse {
    pub component: String,
    pub previous: String,
    pub state: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_decodes_components() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/components")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"component":"datastore","status":"healthy","metrics":{"uptime_secs":12},"integrity_score":100.0}]"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let components: Vec<ComponentHealth> = client.get("api/v1/components").await.unwrap();

        mock.assert_async().await;
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].status, "healthy");
        assert!(components[0].message.is_none());
    }

    #[tokio::test]
    async fn test_error_body_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/api/v1/override")
            .with_status(404)
            .with_body(r#"{"error":"unknown component: ghost"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let request = OverrideRequest {
            component: "ghost".to_string(),
            state: "healthy".to_string(),
        };
        let err = client
            .post::<OverrideResponse, _>("api/v1/override", &request)
            .await
            .unwrap_err()
            .to_string();

        assert!(err.contains("404"));
        assert!(err.contains("unknown component: ghost"));
    }

    #[tokio::test]
    async fn test_non_json_error_body_kept_verbatim() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/status")
            .with_status(502)
            .with_body("bad gateway")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.get::<StatusReport>("api/v1/status").await.unwrap_err();
        assert!(err.to_string().contains("bad gateway"));
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(ApiClient::new("not a url").is_err());
    }
}
