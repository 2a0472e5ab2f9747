//! Transitive requirement propagation
//!
//! When a dependency is discovered below a consumer, each dependant edge on
//! the way to the root decides what the dependant inherits:
//!
//! ```text
//! consumer ---edge--->  intermediate<pkg_type> ---require---> dep<dep_type>
//!     \ -------------------- transform_downstream --------------- /
//! ```

use std::collections::BTreeSet;

use tracing::debug;

use crate::dependency::graph::DepsGraph;
use crate::dependency::node::{EdgeId, NodeId, TransitiveRequirement};
use crate::dependency::package_type::PackageType;
use crate::dependency::requirement::{Requirement, RequirementKey};
use crate::error::GraphError;

/// Requirement to record at the consumer of `edge` for a dependency that the
/// intermediate node (of type `pkg_type`) requires with `require`
///
/// `dep_type` is `None` while the dependency type is not known yet. Returns
/// `None` when nothing propagates.
pub fn transform_downstream(
    edge: &Requirement,
    pkg_type: PackageType,
    require: &Requirement,
    dep_type: Option<PackageType>,
) -> Option<Requirement> {
    if !require.is_visible() || require.build {
        return None;
    }

    if edge.build {
        // Tools only propagate what must run next to them
        let runtime = dep_type.is_some_and(PackageType::is_runtime) || require.run == Some(true);
        if !runtime {
            return None;
        }
        let mut down = traits(require, false, false, true).as_build();
        down.visible = Some(false);
        down.test = require.test || edge.test;
        return Some(down);
    }

    let mut down = match dep_type {
        Some(PackageType::Shared) | Some(PackageType::Application) => match pkg_type {
            PackageType::Shared | PackageType::Application => traits(require, false, false, true),
            PackageType::Static => traits(require, false, true, true),
            PackageType::HeaderOnly => pass_through(require, Some(true)),
            PackageType::Unknown => traits(require, true, true, true),
        },
        Some(PackageType::Static) => match pkg_type {
            PackageType::Shared | PackageType::Application => traits(require, false, false, false),
            PackageType::Static => traits(require, false, true, false),
            PackageType::HeaderOnly => pass_through(require, Some(false)),
            PackageType::Unknown => traits(require, true, true, false),
        },
        Some(PackageType::HeaderOnly) => traits(require, false, false, false),
        Some(PackageType::Unknown) | None => {
            let mut copy = require.clone();
            copy.private = false;
            copy.direct = false;
            copy.locked_id = None;
            copy
        }
    };

    match require.transitive_headers {
        Some(true) => down.headers = Some(require.includes_headers()),
        Some(false) => down.headers = Some(false),
        None => {}
    }
    match require.transitive_libs {
        Some(true) => down.libs = Some(require.links()),
        Some(false) => down.libs = Some(false),
        None => {}
    }
    // Explicit vetoes on the original requirement survive the table
    if require.headers == Some(false) {
        down.headers = Some(false);
    }
    if require.libs == Some(false) {
        down.libs = Some(false);
    }

    if edge.transitive_headers.is_some() {
        down.transitive_headers = edge.transitive_headers;
    }
    if edge.transitive_libs.is_some() {
        down.transitive_libs = edge.transitive_libs;
    }

    if !edge.is_visible() {
        down.visible = Some(false);
    }

    if pkg_type != PackageType::HeaderOnly {
        if edge.headers == Some(false) {
            down.headers = Some(false);
        }
        if edge.libs == Some(false) {
            down.libs = Some(false);
        }
    }
    down.test = require.test || edge.test;
    Some(down)
}

fn traits(require: &Requirement, headers: bool, libs: bool, run: bool) -> Requirement {
    let mut down = Requirement::new(require.reference.clone());
    down.headers = Some(headers);
    down.libs = Some(libs);
    down.run = Some(run);
    down.direct = false;
    down
}

fn pass_through(require: &Requirement, run: Option<bool>) -> Requirement {
    let mut down = Requirement::new(require.reference.clone());
    down.headers = require.headers;
    down.libs = require.libs;
    down.run = run;
    down.direct = false;
    down
}

/// Record `require -> dep` at `at` and walk every dependant edge towards the root
///
/// The walk stops when nothing propagates, when a dependant already holds an
/// identical record, or at the root. A record for the same key pointing to a
/// node with a different reference is a conflict.
pub fn propagate_downstream(
    graph: &mut DepsGraph,
    at: NodeId,
    require: Requirement,
    dep: NodeId,
) -> Result<(), GraphError> {
    let key = require.key();
    let mut record = require;
    let mut target = dep;

    if let Some(existing) = graph.node(at).transitive(&key).cloned() {
        if existing.node != dep {
            if graph.node(existing.node).reference != graph.node(dep).reference {
                return Err(runtime_conflict(graph, at, existing.node, dep));
            }
            // Same reference reached through another node, keep the first one
            target = existing.node;
        }
        let mut merged = record.clone();
        merged.aggregate(&existing.require);
        if merged == existing.require && target == existing.node {
            return Ok(());
        }
        record = merged;
    }

    debug!(
        "{}: transitive {} -> node {} (headers={:?} libs={:?} run={:?})",
        graph.node(at),
        record.reference,
        target,
        record.headers,
        record.libs,
        record.run
    );
    graph.node_mut(at).set_transitive(TransitiveRequirement {
        require: record.clone(),
        node: target,
    });

    if !record.is_visible() {
        return Ok(());
    }

    for edge in graph.node(at).dependants.clone() {
        propagate_through_edge(graph, edge, &record, target)?;
    }
    Ok(())
}

/// Transform `require` through one edge and continue the walk at its source
pub fn propagate_through_edge(
    graph: &mut DepsGraph,
    edge: EdgeId,
    require: &Requirement,
    dep: NodeId,
) -> Result<(), GraphError> {
    let (src, down) = {
        let e = graph.edge(edge);
        let pkg_type = graph.node(e.dst).package_type;
        let dep_type = Some(graph.node(dep).package_type);
        (e.src, transform_downstream(&e.require, pkg_type, require, dep_type))
    };
    match down {
        Some(down) => propagate_downstream(graph, src, down, dep),
        None => Ok(()),
    }
}

/// Existing record found by [`check_downstream_exists`]
#[derive(Debug, Clone)]
pub struct DownstreamMatch {
    pub require: Requirement,
    pub node: NodeId,
    /// Node holding the record
    pub at: NodeId,
}

/// Read-only walk looking for an existing record of the same package from
/// `at` towards the root
pub fn check_downstream_exists(
    graph: &DepsGraph,
    at: NodeId,
    require: &Requirement,
) -> Option<DownstreamMatch> {
    let mut visited = BTreeSet::new();
    check_downstream(graph, at, require.clone(), &mut visited)
}

fn check_downstream(
    graph: &DepsGraph,
    at: NodeId,
    require: Requirement,
    visited: &mut BTreeSet<(NodeId, RequirementKey)>,
) -> Option<DownstreamMatch> {
    if !visited.insert((at, require.key())) {
        return None;
    }

    let node = graph.node(at);
    if let Some(existing) = node.transitive(&require.key()) {
        return Some(DownstreamMatch {
            require: existing.require.clone(),
            node: existing.node,
            at,
        });
    }

    if require.build || require.test {
        return None;
    }

    for &edge in &node.dependants {
        let e = graph.edge(edge);
        if let Some(down) = transform_downstream(&e.require, node.package_type, &require, None) {
            if let Some(found) = check_downstream(graph, e.src, down, visited) {
                return Some(found);
            }
        }
    }
    None
}

fn runtime_conflict(graph: &DepsGraph, at: NodeId, existing: NodeId, dep: NodeId) -> GraphError {
    let new_ref = graph.node(dep).ref_str();
    GraphError::Conflict {
        consumer: graph.node(at).display_name.clone(),
        requirement: new_ref,
        previous_consumer: graph.first_consumer(existing),
        previous: graph.node(existing).ref_str(),
        package: graph.node(dep).name().unwrap_or_default().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::node::{Context, GraphNode};
    use crate::recipe::RecipeStatus;
    use crate::reference::Reference;

    fn req(s: &str) -> Requirement {
        Requirement::parse(s).unwrap()
    }

    fn typed_node(reference: &str, package_type: PackageType) -> GraphNode {
        let reference = Reference::parse(reference).unwrap();
        let mut node = GraphNode::new(Some(reference), Context::Host, RecipeStatus::Cached);
        node.package_type = package_type;
        node
    }

    fn bits(r: &Requirement) -> (Option<bool>, Option<bool>, Option<bool>) {
        (r.headers, r.libs, r.run)
    }

    #[test]
    fn test_shared_dependency_rows() {
        let edge = req("mid/1.0");
        let dep = req("liba/1.0");
        let shared = Some(PackageType::Shared);

        let down = transform_downstream(&edge, PackageType::Shared, &dep, shared).unwrap();
        assert_eq!(bits(&down), (Some(false), Some(false), Some(true)));

        let down = transform_downstream(&edge, PackageType::Static, &dep, shared).unwrap();
        assert_eq!(bits(&down), (Some(false), Some(true), Some(true)));

        let down = transform_downstream(&edge, PackageType::Application, &dep, shared).unwrap();
        assert_eq!(bits(&down), (Some(false), Some(false), Some(true)));

        let down = transform_downstream(&edge, PackageType::Unknown, &dep, shared).unwrap();
        assert_eq!(bits(&down), (Some(true), Some(true), Some(true)));
    }

    #[test]
    fn test_static_dependency_rows() {
        let edge = req("mid/1.0");
        let dep = req("liba/1.0");
        let stat = Some(PackageType::Static);

        let down = transform_downstream(&edge, PackageType::Shared, &dep, stat).unwrap();
        assert_eq!(bits(&down), (Some(false), Some(false), Some(false)));

        let down = transform_downstream(&edge, PackageType::Static, &dep, stat).unwrap();
        assert_eq!(bits(&down), (Some(false), Some(true), Some(false)));

        let down = transform_downstream(&edge, PackageType::Unknown, &dep, stat).unwrap();
        assert_eq!(bits(&down), (Some(true), Some(true), Some(false)));
    }

    #[test]
    fn test_header_only_and_unknown_dependencies() {
        let edge = req("mid/1.0");
        let dep = req("liba/1.0").with_run(true);

        let down = transform_downstream(
            &edge,
            PackageType::Static,
            &dep,
            Some(PackageType::HeaderOnly),
        )
        .unwrap();
        assert_eq!(bits(&down), (Some(false), Some(false), Some(false)));

        let down = transform_downstream(&edge, PackageType::Static, &dep, None).unwrap();
        assert_eq!(bits(&down), (None, None, Some(true)));
        assert!(!down.direct);
    }

    #[test]
    fn test_overrides_on_the_table() {
        let edge = req("mid/1.0");
        let shared = Some(PackageType::Shared);

        let dep = req("liba/1.0").with_transitive_headers(true);
        let down = transform_downstream(&edge, PackageType::Shared, &dep, shared).unwrap();
        assert_eq!(down.headers, Some(true));

        let dep = req("liba/1.0").with_libs(false);
        let down = transform_downstream(&edge, PackageType::Static, &dep, shared).unwrap();
        assert_eq!(down.libs, Some(false), "explicit veto survives");

        let dep = req("liba/1.0").as_test();
        let down = transform_downstream(&edge, PackageType::Static, &dep, shared).unwrap();
        assert!(down.test);

        let private_edge = req("mid/1.0").as_private();
        let down =
            transform_downstream(&private_edge, PackageType::Static, &req("liba/1.0"), shared)
                .unwrap();
        assert!(!down.is_visible());
    }

    #[test]
    fn test_invisible_and_build_requirements_stop() {
        let edge = req("mid/1.0");
        let shared = Some(PackageType::Shared);
        assert!(transform_downstream(&edge, PackageType::Static, &req("a/1").as_private(), shared)
            .is_none());
        assert!(transform_downstream(&edge, PackageType::Static, &req("a/1").as_build(), shared)
            .is_none());
    }

    #[test]
    fn test_build_edge_narrows_runtime_dependencies() {
        let tool_edge = req("tool/1.0").as_build();

        let down = transform_downstream(
            &tool_edge,
            PackageType::Application,
            &req("libx/1.0"),
            Some(PackageType::Shared),
        )
        .unwrap();
        assert!(down.build);
        assert_eq!(bits(&down), (Some(false), Some(false), Some(true)));
        assert!(!down.is_visible());

        assert!(transform_downstream(
            &tool_edge,
            PackageType::Application,
            &req("libx/1.0"),
            Some(PackageType::Static),
        )
        .is_none());

        assert!(transform_downstream(
            &tool_edge,
            PackageType::Application,
            &req("libx/1.0").with_run(true),
            Some(PackageType::Static),
        )
        .is_some());
    }

    #[test]
    fn test_runtime_conflict_between_branches() {
        // virtual -> libb -> liba/1.0, virtual -> libd -> liba/1.0 (second node),
        // virtual -> libc -> liba/2.0, every library shared
        let root = GraphNode::new(None, Context::Host, RecipeStatus::Virtual);
        let mut graph = DepsGraph::new(root);
        let libb = graph.add_node(typed_node("libb/1.0", PackageType::Shared));
        let libd = graph.add_node(typed_node("libd/1.0", PackageType::Shared));
        let libc = graph.add_node(typed_node("libc/1.0", PackageType::Shared));
        let liba = graph.add_node(typed_node("liba/1.0", PackageType::Shared));
        let liba_copy = graph.add_node(typed_node("liba/1.0", PackageType::Shared));
        let liba2 = graph.add_node(typed_node("liba/2.0", PackageType::Shared));
        graph.add_edge(0, libb, req("libb/1.0"));
        graph.add_edge(0, libd, req("libd/1.0"));
        graph.add_edge(0, libc, req("libc/1.0"));
        graph.add_edge(libb, liba, req("liba/1.0"));
        graph.add_edge(libd, liba_copy, req("liba/1.0"));
        graph.add_edge(libc, liba2, req("liba/2.0"));

        propagate_downstream(&mut graph, libb, req("liba/1.0"), liba).unwrap();
        let key = req("liba/1.0").key();
        let record = graph.root().transitive(&key).unwrap();
        assert_eq!(record.node, liba);
        assert_eq!(bits(&record.require), (Some(false), Some(false), Some(true)));

        // Same reference through another node keeps the first one
        propagate_downstream(&mut graph, libd, req("liba/1.0"), liba_copy).unwrap();
        assert_eq!(graph.root().transitive(&key).unwrap().node, liba);

        let err = propagate_downstream(&mut graph, libc, req("liba/2.0"), liba2).unwrap_err();
        match err {
            GraphError::Conflict {
                consumer,
                requirement,
                previous_consumer,
                previous,
                package,
            } => {
                assert_eq!(consumer, "virtual");
                assert_eq!(requirement, "liba/2.0");
                assert_eq!(previous_consumer, "libb/1.0");
                assert_eq!(previous, "liba/1.0");
                assert_eq!(package, "liba");
            }
            other => panic!("expected a conflict, got {:?}", other),
        }
    }
}
