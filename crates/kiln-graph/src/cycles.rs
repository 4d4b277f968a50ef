//! Dependency-cycle detection and event-emission-cycle detection.

use std::collections::{HashMap, HashSet};

use kiln_core::Id;
use kiln_error::KilnError;
use kiln_store::Store;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde_json::Value;

/// A directed graph over unit ids: an edge `a -> b` means "a depends on b".
struct DependencyGraph {
    graph: DiGraph<Id, ()>,
    index: HashMap<Id, NodeIndex>,
    middleware_ids: HashSet<Id>,
}

impl DependencyGraph {
    fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
            middleware_ids: HashSet::new(),
        }
    }

    fn node(&mut self, id: &Id) -> NodeIndex {
        if let Some(existing) = self.index.get(id) {
            return *existing;
        }
        let idx = self.graph.add_node(id.clone());
        self.index.insert(id.clone(), idx);
        idx
    }

    fn edge(&mut self, from: &Id, to: &Id) {
        let a = self.node(from);
        let b = self.node(to);
        self.graph.add_edge(a, b, ());
    }

    /// Builds the structural dependency graph from every unit kind in
    /// `store`: resource/task dependencies, task/resource middleware
    /// attachments plus their own dependencies, and hook subscriptions
    /// plus their own dependencies.
    fn build(store: &Store) -> Self {
        let mut g = Self::new();

        for entry in &store.resources {
            let resource = &entry.value().definition;
            let resolved = resource
                .dependencies
                .as_ref()
                .map(|spec| spec.resolve(&entry.value().config))
                .unwrap_or_default();
            for target in resolved.values() {
                g.edge(&resource.id, target);
            }
            for attachment in &resource.middleware {
                g.middleware_ids.insert(attachment.middleware.id.clone());
                g.edge(&resource.id, &attachment.middleware.id);
                let mw_deps = attachment
                    .middleware
                    .dependencies
                    .as_ref()
                    .map(|spec| spec.resolve(&Value::Null))
                    .unwrap_or_default();
                for target in mw_deps.values() {
                    g.edge(&attachment.middleware.id, target);
                }
            }
        }

        for entry in &store.tasks {
            let task = entry.value();
            let resolved = task
                .dependencies
                .as_ref()
                .map(|spec| spec.resolve(&Value::Null))
                .unwrap_or_default();
            for target in resolved.values() {
                g.edge(&task.id, target);
            }
            for attachment in &task.middleware {
                g.middleware_ids.insert(attachment.middleware.id.clone());
                g.edge(&task.id, &attachment.middleware.id);
                let mw_deps = attachment
                    .middleware
                    .dependencies
                    .as_ref()
                    .map(|spec| spec.resolve(&Value::Null))
                    .unwrap_or_default();
                for target in mw_deps.values() {
                    g.edge(&attachment.middleware.id, target);
                }
            }
        }

        for entry in &store.hooks {
            let hook = entry.value();
            for event_id in hook.on.explicit_ids() {
                g.edge(&hook.id, &event_id);
            }
            let resolved = hook
                .dependencies
                .as_ref()
                .map(|spec| spec.resolve(&Value::Null))
                .unwrap_or_default();
            for target in resolved.values() {
                g.edge(&hook.id, target);
            }
        }

        g
    }

    /// DFS with a gray/black coloring; returns the first cycle found as a
    /// path that starts and ends at the same id, plus whether a middleware
    /// id participates (for remediation text).
    fn detect_cycle(&self) -> Option<(Vec<Id>, bool)> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Color {
            White,
            Gray,
            Black,
        }
        let mut colors = vec![Color::White; self.graph.node_count()];
        let mut path: Vec<NodeIndex> = Vec::new();

        fn visit(
            g: &DependencyGraph,
            node: NodeIndex,
            colors: &mut Vec<Color>,
            path: &mut Vec<NodeIndex>,
        ) -> Option<(Vec<Id>, bool)> {
            colors[node.index()] = Color::Gray;
            path.push(node);
            for neighbor in g.graph.neighbors(node) {
                match colors[neighbor.index()] {
                    Color::White => {
                        if let Some(found) = visit(g, neighbor, colors, path) {
                            return Some(found);
                        }
                    }
                    Color::Gray => {
                        let start = path.iter().position(|n| *n == neighbor).unwrap();
                        let mut cycle: Vec<Id> = path[start..].iter().map(|n| g.graph[*n].clone()).collect();
                        let involves_middleware = path[start..]
                            .iter()
                            .any(|n| g.middleware_ids.contains(&g.graph[*n]));
                        cycle.push(cycle[0].clone());
                        return Some((cycle, involves_middleware));
                    }
                    Color::Black => {}
                }
            }
            path.pop();
            colors[node.index()] = Color::Black;
            None
        }

        for start in self.graph.node_indices() {
            if colors[start.index()] == Color::White {
                if let Some(found) = visit(self, start, &mut colors, &mut path) {
                    return Some(found);
                }
            }
        }
        None
    }
}

/// Validates that `store`'s dependency graph (including middleware
/// attachments and hook subscriptions) contains no cycle.
///
/// # Errors
/// Returns [`KilnError::CircularDependencies`] with a path through the
/// first cycle found.
pub fn validate_dependency_graph(store: &Store) -> Result<(), KilnError> {
    let graph = DependencyGraph::build(store);
    if let Some((path, involves_middleware)) = graph.detect_cycle() {
        tracing::warn!(path = ?path, "circular dependency detected");
        return Err(KilnError::CircularDependencies {
            path: path.iter().map(ToString::to_string).collect(),
            involves_middleware,
        });
    }
    Ok(())
}

/// Detects cycles in the *emission* graph: a hook listening on event `e`
/// that may itself emit event `e'` contributes an edge `e -> e'` (via the
/// hook); a cycle here means some event's own hooks can re-trigger it
/// transitively, forming a compile-time-detectable emission loop distinct
/// from the per-emission runtime guard in.
///
/// # Errors
/// Returns [`KilnError::EventEmissionCycle`] for the first SCC of size >= 2
/// found.
pub fn detect_event_emission_cycles(store: &Store) -> Result<(), KilnError> {
    let mut graph: DiGraph<Id, ()> = DiGraph::new();
    let mut index: HashMap<Id, NodeIndex> = HashMap::new();
    let mut node = |graph: &mut DiGraph<Id, ()>, index: &mut HashMap<Id, NodeIndex>, id: &Id| -> NodeIndex {
        if let Some(existing) = index.get(id) {
            return *existing;
        }
        let idx = graph.add_node(id.clone());
        index.insert(id.clone(), idx);
        idx
    };

    for entry in &store.hooks {
        let hook = entry.value();
        if hook.emits.is_empty() {
            continue;
        }
        for source_event in hook.on.explicit_ids() {
            let from = node(&mut graph, &mut index, &source_event);
            for target_event in &hook.emits {
                let to = node(&mut graph, &mut index, target_event);
                graph.add_edge(from, to, ());
            }
        }
    }

    for scc in tarjan_scc(&graph) {
        if scc.len() >= 2 {
            let path: Vec<String> = scc.iter().map(|n| graph[*n].to_string()).collect();
            tracing::warn!(path = ?path, "event emission cycle detected");
            return Err(KilnError::EventEmissionCycle { path });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_definitions::{DepSpec, Item, Resource, Task};
    use std::sync::Arc;

    #[test]
    fn detects_a_simple_resource_cycle() {
        let a = Resource::new("a", |_c, _d| Box::pin(async { Ok(Arc::new(()) as kiln_definitions::DynValue) }))
            .with_dependencies(DepSpec::fixed([("b", Id::new("b"))]));
        let b = Resource::new("b", |_c, _d| Box::pin(async { Ok(Arc::new(()) as kiln_definitions::DynValue) }))
            .with_dependencies(DepSpec::fixed([("a", Id::new("a"))]));
        let root = Resource::new("root", |_c, _d| Box::pin(async { Ok(Arc::new(()) as kiln_definitions::DynValue) }))
            .with_register(vec![
                Item::Resource(Arc::new(a), Some(Value::Null)),
                Item::Resource(Arc::new(b), Some(Value::Null)),
            ]);
        let store = Store::build(Arc::new(root), Value::Null).unwrap();
        let err = validate_dependency_graph(&store).unwrap_err();
        assert!(matches!(err, KilnError::CircularDependencies { .. }));
    }

    #[test]
    fn acyclic_graph_passes() {
        let child = Task::new("child", |i, _d| Box::pin(async move { Ok(i) }));
        let root = Resource::new("root", |_c, _d| Box::pin(async { Ok(Arc::new(()) as kiln_definitions::DynValue) }))
            .with_register(vec![Item::Task(Arc::new(child))]);
        let store = Store::build(Arc::new(root), Value::Null).unwrap();
        assert!(validate_dependency_graph(&store).is_ok());
    }
}
