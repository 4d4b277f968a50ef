//! Topological layering over the resource-only dependency graph: resources whose dependencies are all satisfied share a
//! layer, and layers init in order while resources *within* a layer race
//! each other via `join_all`.

use std::collections::HashMap;

use kiln_core::Id;
use kiln_error::KilnError;
use kiln_store::Store;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde_json::Value;

/// Builds the resource-only dependency edges: a resource depends on every
/// other resource named by its own `dependencies`, plus every resource
/// named by its resource-middleware attachments' own dependencies (the
/// middleware runs as part of this resource's init, so its deps must be
/// ready first too).
fn resource_edges(store: &Store) -> Vec<(Id, Id)> {
    let mut edges = Vec::new();
    for entry in &store.resources {
        let resource_entry = entry.value();
        let resource = &resource_entry.definition;

        if let Some(spec) = &resource.dependencies {
            for target in spec.resolve(&resource_entry.config).values() {
                if store.resources.contains_key(target) {
                    edges.push((resource.id.clone(), target.clone()));
                }
            }
        }

        for attachment in &resource.middleware {
            if let Some(spec) = &attachment.middleware.dependencies {
                for target in spec.resolve(&Value::Null).values() {
                    if store.resources.contains_key(target) {
                        edges.push((resource.id.clone(), target.clone()));
                    }
                }
            }
        }
    }
    edges
}

/// Groups every registered resource id into ordered layers: layer 0 has no
/// resource dependencies, layer *n* depends only on resources in layers
/// `< n`. Ties within a layer are broken by registration order.
///
/// # Errors
/// Returns [`KilnError::ParallelInitScheduling`] if the resource graph
/// contains a cycle — this should already have been rejected by
/// `kiln-graph::cycles::validate_dependency_graph` before `initialize()`
/// ever runs, so surfacing here means that check was skipped.
pub fn compute_layers(store: &Store) -> Result<Vec<Vec<Id>>, KilnError> {
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

    for id in store.resources_in_registration_order() {
        node(&mut graph, &mut index, &id);
    }
    for (from, to) in resource_edges(store) {
        let a = node(&mut graph, &mut index, &from);
        let b = node(&mut graph, &mut index, &to);
        // edge direction in the graph is "depends on"; toposort yields
        // dependencies before dependents when edges point dependent ->
        // dependency and we reverse the sorted order, so add it as-is and
        // read the toposort result back to front.
        graph.add_edge(a, b, ());
    }

    let sorted = toposort(&graph, None).map_err(|cycle| KilnError::ParallelInitScheduling {
        reason: format!(
            "resource dependency graph contains a cycle at \"{}\"",
            graph[cycle.node_id()]
        ),
    })?;

    // toposort with "depends on" edges lists dependents before their
    // dependencies; reverse it so ancestors (no deps) come first.
    let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
    for &node_idx in sorted.iter().rev() {
        let mut max_dep_depth = 0usize;
        for dep in graph.neighbors(node_idx) {
            max_dep_depth = max_dep_depth.max(depth.get(&dep).copied().unwrap_or(0) + 1);
        }
        depth.insert(node_idx, max_dep_depth);
    }

    let registration_order = store.resources_in_registration_order();
    let mut layer_of: HashMap<Id, usize> = HashMap::new();
    let mut max_layer = 0usize;
    for (&node_idx, &d) in &depth {
        layer_of.insert(graph[node_idx].clone(), d);
        max_layer = max_layer.max(d);
    }

    let mut layers = vec![Vec::new(); max_layer + 1];
    for id in registration_order {
        let layer = layer_of.get(&id).copied().unwrap_or(0);
        layers[layer].push(id);
    }

    Ok(layers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_definitions::{DepSpec, Item, Resource};
    use std::sync::Arc;

    fn noop(id: &str) -> Resource {
        Resource::new(id, |_c, _d| Box::pin(async { Ok(Arc::new(()) as kiln_definitions::DynValue) }))
    }

    #[test]
    fn independent_resources_share_a_layer() {
        let a = noop("a");
        let b = noop("b");
        let root = noop("root").with_register(vec![
            Item::Resource(Arc::new(a), Some(Value::Null)),
            Item::Resource(Arc::new(b), Some(Value::Null)),
        ]);
        let store = Store::build(Arc::new(root), Value::Null).unwrap();
        let layers = compute_layers(&store).unwrap();
        let last = layers.last().unwrap();
        assert!(last.contains(&Id::new("a")));
        assert!(last.contains(&Id::new("b")));
    }

    #[test]
    fn dependent_resource_lands_in_a_later_layer() {
        let db = noop("db");
        let api = noop("api").with_dependencies(DepSpec::fixed([("db", Id::new("db"))]));
        let root = noop("root").with_register(vec![
            Item::Resource(Arc::new(db), Some(Value::Null)),
            Item::Resource(Arc::new(api), Some(Value::Null)),
        ]);
        let store = Store::build(Arc::new(root), Value::Null).unwrap();
        let layers = compute_layers(&store).unwrap();

        let db_layer = layers.iter().position(|l| l.contains(&Id::new("db"))).unwrap();
        let api_layer = layers.iter().position(|l| l.contains(&Id::new("api"))).unwrap();
        assert!(db_layer < api_layer);
    }
}
