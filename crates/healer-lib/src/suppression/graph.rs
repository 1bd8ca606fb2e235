//! Static component dependency graph

use crate::error::HealerError;
use std::collections::{BTreeMap, HashMap};

/// Map from a component to the components it relies on
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a component and its direct dependencies, replacing any previous entry
    pub fn add(&mut self, component: impl Into<String>, depends_on: Vec<String>) {
        self.edges.insert(component.into(), depends_on);
    }

    pub fn with(mut self, component: impl Into<String>, depends_on: &[&str]) -> Self {
        self.add(component, depends_on.iter().map(|d| d.to_string()).collect());
        self
    }

    pub fn contains(&self, component: &str) -> bool {
        self.edges.contains_key(component)
    }

    /// Direct dependencies of `component`
    pub fn dependencies_of(&self, component: &str) -> &[String] {
        self.edges.get(component).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Components that list `component` as a direct dependency
    pub fn dependents_of(&self, component: &str) -> Vec<String> {
        let mut dependents: Vec<String> = self
            .edges
            .iter()
            .filter(|(_, deps)| deps.iter().any(|d| d == component))
            .map(|(id, _)| id.clone())
            .collect();
        dependents.sort();
        dependents
    }

    pub fn components(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.edges.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Every dependency must itself be a known component
    pub fn validate(&self) -> Result<(), HealerError> {
        for (component, deps) in &self.edges {
            for dep in deps {
                if dep == component {
                    return Err(HealerError::Config(format!(
                        "component {} depends on itself",
                        component
                    )));
                }
                if !self.edges.contains_key(dep) {
                    return Err(HealerError::Config(format!(
                        "component {} depends on unknown component {}",
                        component, dep
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn to_map(&self) -> BTreeMap<String, Vec<String>> {
        self.edges
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> DependencyGraph {
        DependencyGraph::new()
            .with("datastore", &[])
            .with("cache", &["datastore"])
            .with("server", &["datastore", "cache"])
            .with("telemetry", &["server"])
    }

    #[test]
    fn test_dependencies_and_dependents() {
        let g = graph();
        assert_eq!(g.dependencies_of("server"), &["datastore".to_string(), "cache".to_string()]);
        assert!(g.dependencies_of("unknown").is_empty());
        assert_eq!(g.dependents_of("datastore"), vec!["cache", "server"]);
        assert!(g.dependents_of("telemetry").is_empty());
    }

    #[test]
    fn test_validate_rejects_unknown_and_self_edges() {
        assert!(graph().validate().is_ok());

        let dangling = graph().with("worker", &["queue"]);
        assert!(matches!(dangling.validate(), Err(HealerError::Config(_))));

        let looped = DependencyGraph::new().with("a", &["a"]);
        assert!(looped.validate().is_err());
    }
}
