//! Dependency graph data structures and algorithms
//!
//! The graph exclusively owns its nodes and edges. Node 0 is always the root
//! and nodes are never removed once added.

use std::collections::{BTreeMap, BTreeSet};

use crate::dependency::node::{Edge, EdgeId, GraphNode, LockStatus, NodeId};
use crate::dependency::requirement::Requirement;
use crate::error::GraphError;
use crate::reference::Reference;

/// A requirement reference replaced by a downstream one
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Override {
    /// Node whose requirement was overridden
    pub consumer: String,
    pub declared: Reference,
    pub forced: Reference,
    /// Downstream consumer imposing the reference
    pub by: String,
}

/// Resolved dependency graph
#[derive(Debug)]
pub struct DepsGraph {
    nodes: Vec<GraphNode>,
    edges: Vec<Edge>,

    /// Alias reference -> reference it points to
    pub aliased: BTreeMap<Reference, Reference>,

    pub overrides: Vec<Override>,

    /// Terminal error recorded instead of raised in inspection mode
    pub error: Option<GraphError>,
}

impl DepsGraph {
    /// Create a graph holding only its root
    pub(crate) fn new(mut root: GraphNode) -> Self {
        root.id = 0;
        Self {
            nodes: vec![root],
            edges: Vec::new(),
            aliased: BTreeMap::new(),
            overrides: Vec::new(),
            error: None,
        }
    }

    pub(crate) fn add_node(&mut self, mut node: GraphNode) -> NodeId {
        let id = self.nodes.len();
        node.id = id;
        self.nodes.push(node);
        id
    }

    /// Add an edge unless `src -> dst` already exists
    ///
    /// Returns the edge id and whether it was created.
    pub(crate) fn add_edge(&mut self, src: NodeId, dst: NodeId, require: Requirement) -> (EdgeId, bool) {
        if let Some(&existing) = self.nodes[src]
            .dependencies
            .iter()
            .find(|&&e| self.edges[e].dst == dst)
        {
            return (existing, false);
        }
        let id = self.edges.len();
        self.edges.push(Edge { src, dst, require });
        self.nodes[src].dependencies.push(id);
        self.nodes[dst].dependants.push(id);
        (id, true)
    }

    /// Keep closures consistent when `node` becomes connected to `other`
    pub(crate) fn connect_closure(&mut self, node: NodeId, other: NodeId) {
        let Some(name) = self.nodes[other].name().map(str::to_string) else {
            return;
        };
        let context = self.nodes[other].context;
        let n = &mut self.nodes[node];
        n.public_closure.insert(&name, context, other);
        n.public_deps.insert(&name, context, other);
        self.nodes[other].inverse_closure.insert(node);
    }

    /// Clear the private flag of a node and of everything it publicly requires
    pub(crate) fn make_public(&mut self, node: NodeId) {
        let mut stack = vec![node];
        let mut seen = BTreeSet::new();
        while let Some(id) = stack.pop() {
            if !seen.insert(id) {
                continue;
            }
            self.nodes[id].private = false;
            for &edge in &self.nodes[id].dependencies {
                let e = &self.edges[edge];
                if !e.require.private {
                    stack.push(e.dst);
                }
            }
        }
    }

    pub fn root(&self) -> &GraphNode {
        &self.nodes[0]
    }

    pub fn node(&self, id: NodeId) -> &GraphNode {
        &self.nodes[id]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut GraphNode {
        &mut self.nodes[id]
    }

    pub fn nodes(&self) -> &[GraphNode] {
        &self.nodes
    }

    pub fn edge(&self, id: EdgeId) -> &Edge {
        &self.edges[id]
    }

    pub(crate) fn edge_mut(&mut self, id: EdgeId) -> &mut Edge {
        &mut self.edges[id]
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Direct dependencies, in edge insertion order
    pub fn neighbors(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes[id]
            .dependencies
            .iter()
            .map(|&e| self.edges[e].dst)
            .collect()
    }

    /// Direct dependants, in edge insertion order
    pub fn inverse_neighbors(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes[id]
            .dependants
            .iter()
            .map(|&e| self.edges[e].src)
            .collect()
    }

    /// Display name of the first node that required `id`
    pub fn first_consumer(&self, id: NodeId) -> String {
        self.nodes[id]
            .dependants
            .first()
            .map(|&e| self.nodes[self.edges[e].src].display_name.clone())
            .unwrap_or_default()
    }

    /// All nodes for a package name
    pub fn find(&self, name: &str) -> Vec<&GraphNode> {
        self.nodes
            .iter()
            .filter(|n| n.name() == Some(name))
            .collect()
    }

    /// Topological levels, nodes without dependencies first
    ///
    /// Each level is sorted by reference text, then id, so the output is
    /// stable across runs.
    pub fn by_levels(&self) -> Vec<Vec<NodeId>> {
        self.order_levels(true)
    }

    /// Topological levels, nodes without dependants (the root) first
    pub fn inverse_levels(&self) -> Vec<Vec<NodeId>> {
        self.order_levels(false)
    }

    fn order_levels(&self, direct: bool) -> Vec<Vec<NodeId>> {
        let mut result = Vec::new();
        let mut opened: BTreeSet<NodeId> = (0..self.nodes.len()).collect();

        while !opened.is_empty() {
            let mut level: Vec<NodeId> = opened
                .iter()
                .copied()
                .filter(|&id| {
                    let neighbors = if direct {
                        self.neighbors(id)
                    } else {
                        self.inverse_neighbors(id)
                    };
                    !neighbors.iter().any(|n| opened.contains(n))
                })
                .collect();

            if level.is_empty() {
                // Only reachable with a cycle; emit the rest as one level
                level = opened.iter().copied().collect();
            }

            level.sort_by_key(|&id| (self.nodes[id].ref_str(), id));
            for id in &level {
                opened.remove(id);
            }
            result.push(level);
        }

        result
    }

    /// Mark a node as rebuilt/re-exported in this run
    pub fn mark_modified(&mut self, id: NodeId) {
        self.nodes[id].lock_status = LockStatus::Modified;
    }

    /// Fail if this graph cannot be handed to binary analysis or locking
    pub fn check_buildable(&self) -> Result<(), GraphError> {
        if let Some(error) = &self.error {
            return Err(GraphError::Unbuildable {
                reason: error.to_string(),
            });
        }
        let missing: Vec<String> = self
            .nodes
            .iter()
            .filter(|n| n.is_missing())
            .map(|n| n.ref_str())
            .collect();
        if !missing.is_empty() {
            return Err(GraphError::Unbuildable {
                reason: format!("missing recipes: {}", missing.join(", ")),
            });
        }
        Ok(())
    }

    /// Get the dependency tree as a string for display
    pub fn format_tree(&self) -> String {
        let mut output = String::new();
        let mut visited = BTreeSet::new();
        self.format_node(0, "", "", None, &mut output, &mut visited);
        output
    }

    /// Format a single node and its children
    fn format_node(
        &self,
        id: NodeId,
        prefix: &str,
        child_prefix: &str,
        edge: Option<&Edge>,
        output: &mut String,
        visited: &mut BTreeSet<NodeId>,
    ) {
        let node = &self.nodes[id];
        let already_visited = visited.contains(&id);

        let mut markers = Vec::new();
        if let Some(edge) = edge {
            if edge.require.build {
                markers.push("build".to_string());
            }
            if edge.require.private {
                markers.push("private".to_string());
            }
            if edge.require.test {
                markers.push("test".to_string());
            }
        }
        if node.is_missing() {
            markers.push("missing".to_string());
        }
        if id != 0 {
            markers.push(node.package_type.to_string());
        }

        output.push_str(prefix);
        output.push_str(&node.display_name);
        if !markers.is_empty() {
            output.push_str(&format!(" [{}]", markers.join(", ")));
        }
        if already_visited {
            output.push_str(" (already resolved)");
        }
        output.push('\n');

        if already_visited {
            return;
        }
        visited.insert(id);

        let deps = &node.dependencies;
        for (i, &edge_id) in deps.iter().enumerate() {
            let edge = &self.edges[edge_id];
            let is_last = i == deps.len() - 1;
            let (branch, cont) = if is_last {
                ("└── ", "    ")
            } else {
                ("├── ", "│   ")
            };
            self.format_node(
                edge.dst,
                &format!("{}{}", child_prefix, branch),
                &format!("{}{}", child_prefix, cont),
                Some(edge),
                output,
                visited,
            );
        }
    }

    /// Get statistics about the dependency graph
    pub fn stats(&self) -> GraphStats {
        let node_count = self.nodes.len();
        let edge_count = self.edges.len();
        let shared_count = self
            .nodes
            .iter()
            .filter(|n| n.dependants.len() > 1)
            .count();

        // Longest path from the root, levels are already a longest-path layering
        let max_depth = self.inverse_levels().len().saturating_sub(1);

        GraphStats {
            node_count,
            edge_count,
            shared_count,
            max_depth,
        }
    }
}

/// Statistics about a dependency graph
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphStats {
    /// Number of nodes, root included
    pub node_count: usize,

    /// Number of edges
    pub edge_count: usize,

    /// Number of nodes required by more than one consumer
    pub shared_count: usize,

    /// Longest dependency chain from the root
    pub max_depth: usize,
}
