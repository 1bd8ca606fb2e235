//! Self-healing control plane library
//!
//! This crate provides the core functionality for:
//! - Host metrics sampling and resource containment
//! - Recurring task orchestration with circuit breakers and CPU gating
//! - Component health probing and anomaly detection
//! - Dependency-aware healing suppression
//! - Healing execution with loop detection and escalation
//! - Status API and observability

pub mod anomaly;
pub mod api;
pub mod containment;
pub mod control_plane;
pub mod error;
pub mod healing;
pub mod health;
pub mod models;
pub mod observability;
pub mod orchestrator;
pub mod sampler;
pub mod suppression;

pub use control_plane::{ControlPlane, ControlPlaneBuilder, ControlPlaneConfig, StatusReport};
pub use error::HealerError;
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{HealerMetrics, StructuredLogger};
