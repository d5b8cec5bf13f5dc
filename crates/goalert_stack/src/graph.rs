//! Resource dependency graph derived from a template.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{StackError, StackResult};
use crate::template::Template;

/// Edges point from a resource to the resources it references.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<String, BTreeSet<String>>,
    dangling: Vec<(String, String)>,
}

impl DependencyGraph {
    pub fn from_template(template: &Template) -> Self {
        let mut graph = DependencyGraph::default();
        for (id, resource) in &template.resources {
            let mut deps = BTreeSet::new();
            for target in resource.references() {
                if template.resources.contains_key(&target) {
                    deps.insert(target);
                } else {
                    graph.dangling.push((id.clone(), target));
                }
            }
            graph.edges.insert(id.clone(), deps);
        }
        for (id, output) in &template.outputs {
            for target in output.references() {
                if !template.resources.contains_key(&target) {
                    graph.dangling.push((id.clone(), target));
                }
            }
        }
        graph
    }

    /// `(from, to)` pairs whose target is not declared in the template.
    pub fn dangling(&self) -> &[(String, String)] {
        &self.dangling
    }

    pub fn dependencies(&self, logical_id: &str) -> Option<&BTreeSet<String>> {
        self.edges.get(logical_id)
    }

    /// Resources ordered so that every resource follows its dependencies.
    /// Ties break by logical id.
    pub fn topological_order(&self) -> StackResult<Vec<String>> {
        let mut remaining: BTreeMap<&str, usize> = self
            .edges
            .iter()
            .map(|(id, deps)| (id.as_str(), deps.len()))
            .collect();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (id, deps) in &self.edges {
            for dep in deps {
                dependents.entry(dep.as_str()).or_default().push(id.as_str());
            }
        }

        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, count)| **count == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.edges.len());

        while let Some(id) = ready.pop_first() {
            order.push(id.to_string());
            for dependent in dependents.get(id).into_iter().flatten() {
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(*dependent);
                    }
                }
            }
        }

        if order.len() != self.edges.len() {
            let stuck: Vec<&str> = remaining
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(id, _)| *id)
                .collect();
            return Err(StackError::DependencyCycle(stuck.join(", ")));
        }
        Ok(order)
    }
}
