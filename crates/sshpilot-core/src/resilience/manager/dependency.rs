//! Static dependency graph between services

use std::collections::BTreeMap;

use crate::config::DependencySpec;

/// Service -> declared dependencies, fixed at construction
///
/// Cycles are not rejected; cascade evaluation only ever walks one hop.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<String, Vec<DependencySpec>>,
}

impl DependencyGraph {
    pub fn new(edges: BTreeMap<String, Vec<DependencySpec>>) -> Self {
        Self { edges }
    }

    /// Declared dependencies of `service`, in declaration order
    pub fn dependencies_of(&self, service: &str) -> &[DependencySpec] {
        self.edges.get(service).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Dependencies `service` cannot work without
    pub fn required_dependencies_of<'a>(
        &'a self,
        service: &str,
    ) -> impl Iterator<Item = &'a DependencySpec> + 'a {
        self.dependencies_of(service).iter().filter(|dep| dep.required)
    }

    /// Services that declare any dependency on `service`
    pub fn dependents_of(&self, service: &str) -> Vec<String> {
        self.dependents_matching(service, |_| true)
    }

    /// Services that declare a required dependency on `service`
    pub fn required_dependents_of(&self, service: &str) -> Vec<String> {
        self.dependents_matching(service, |dep| dep.required)
    }

    /// The dependency entry `service` declares for `dependency`
    pub fn edge(&self, service: &str, dependency: &str) -> Option<&DependencySpec> {
        self.dependencies_of(service)
            .iter()
            .find(|dep| dep.service == dependency)
    }

    pub fn len(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dependents_matching(
        &self,
        service: &str,
        predicate: impl Fn(&DependencySpec) -> bool,
    ) -> Vec<String> {
        self.edges
            .iter()
            .filter(|(_, deps)| {
                deps.iter()
                    .any(|dep| dep.service == service && predicate(dep))
            })
            .map(|(name, _)| name.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> DependencyGraph {
        let mut edges = BTreeMap::new();
        edges.insert(
            "ssh-command".to_string(),
            vec![DependencySpec::required("ssh-connection")],
        );
        edges.insert(
            "file-transfer".to_string(),
            vec![
                DependencySpec::required("ssh-connection"),
                DependencySpec::optional("logging").with_fallback("memory-store"),
            ],
        );
        DependencyGraph::new(edges)
    }

    #[test]
    fn test_dependents_are_reverse_edges() {
        let graph = graph();
        assert_eq!(
            graph.dependents_of("ssh-connection"),
            vec!["file-transfer".to_string(), "ssh-command".to_string()]
        );
        assert_eq!(graph.dependents_of("logging"), vec!["file-transfer".to_string()]);
        assert!(graph.required_dependents_of("logging").is_empty());
        assert!(graph.dependents_of("ssh-command").is_empty());
    }

    #[test]
    fn test_required_dependencies_skip_optional() {
        let graph = graph();
        let required: Vec<_> = graph
            .required_dependencies_of("file-transfer")
            .map(|dep| dep.service.as_str())
            .collect();
        assert_eq!(required, vec!["ssh-connection"]);
        assert_eq!(graph.len(), 3);
        assert!(graph.dependencies_of("unknown").is_empty());
    }

    #[test]
    fn test_edge_lookup() {
        let graph = graph();
        let edge = graph.edge("file-transfer", "logging").unwrap();
        assert_eq!(edge.fallback.as_deref(), Some("memory-store"));
        assert!(graph.edge("ssh-command", "logging").is_none());
    }
}
