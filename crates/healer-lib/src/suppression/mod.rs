//! Dependency graph and suppression engine

mod engine;
mod graph;

pub use engine::{
    SuppressionConfig, SuppressionEngine, SuppressionSnapshot, DEFAULT_CRITICAL_COMPONENTS,
};
pub use graph::DependencyGraph;
