//! HTTP status API
//!
//! Read-only views of the control plane plus the single administrative
//! mutation, `POST /api/v1/override`.

use crate::control_plane::ControlPlane;
use crate::error::HealerError;
use crate::health::ComponentStatus;
use crate::models::GlobalState;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

const DEFAULT_ACTION_LIMIT: usize = 50;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub control_plane: Arc<ControlPlane>,
}

impl AppState {
    pub fn new(control_plane: Arc<ControlPlane>) -> Self {
        Self { control_plane }
    }
}

/// JSON error body returned by every failing endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

struct ApiError(StatusCode, String);

impl From<HealerError> for ApiError {
    fn from(e: HealerError) -> Self {
        let status = match e {
            HealerError::UnknownComponent(_) | HealerError::UnknownTask(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        };
        ApiError(status, e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorBody { error: self.1 })).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct AnomalyQuery {
    /// Include resolved reports
    #[serde(default)]
    pub all: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct ActionQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideRequest {
    pub component: String,
    pub state: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverrideResponse {
    pub component: String,
    pub previous: GlobalState,
    pub state: GlobalState,
}

/// Managed-system health - 200 unless a component is critical or failed
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.control_plane.health().await;

    let status_code = match health.status {
        ComponentStatus::Critical | ComponentStatus::Failed => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::OK,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.control_plane.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.control_plane.status().await)
}

async fn components(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.control_plane.components().await)
}

async fn anomalies(State(state): State<Arc<AppState>>, Query(query): Query<AnomalyQuery>) -> impl IntoResponse {
    Json(state.control_plane.anomalies(query.all).await)
}

async fn actions(State(state): State<Arc<AppState>>, Query(query): Query<ActionQuery>) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(DEFAULT_ACTION_LIMIT);
    Json(state.control_plane.actions(limit).await)
}

async fn tasks(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.control_plane.tasks().await)
}

async fn suppression(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.control_plane.suppression_snapshot().await)
}

async fn containment(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.control_plane.containment_status().await)
}

async fn override_state(
    State(state): State<Arc<AppState>>,
    Json(request): Json<OverrideRequest>,
) -> Result<Json<OverrideResponse>, ApiError> {
    let new_state: GlobalState = request.state.parse()?;
    let previous = state
        .control_plane
        .override_state(&request.component, new_state)
        .await?;

    Ok(Json(OverrideResponse {
        component: request.component,
        previous,
        state: new_state,
    }))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/status", get(status))
        .route("/api/v1/components", get(components))
        .route("/api/v1/anomalies", get(anomalies))
        .route("/api/v1/actions", get(actions))
        .route("/api/v1/tasks", get(tasks))
        .route("/api/v1/suppression", get(suppression))
        .route("/api/v1/containment", get(containment))
        .route("/api/v1/override", post(override_state))
        .with_state(state)
}

/// Serve the API until `shutdown` resolves
pub async fn serve<F>(addr: SocketAddr, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
