//! Graph vertices and edges
//!
//! Nodes refer to each other by [`NodeId`] (their index in the owning
//! [`DepsGraph`](crate::dependency::graph::DepsGraph)), never by pointer.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::dependency::package_type::PackageType;
use crate::dependency::requirement::{Requirement, RequirementKey, RequirementSet};
use crate::recipe::{DepOptions, OptionValues, RecipeDescriptor, RecipeInputs, RecipeStatus, Settings};
use crate::reference::Reference;

/// Index of a node in its graph
pub type NodeId = usize;

/// Index of an edge in its graph
pub type EdgeId = usize;

/// Machine a package binary executes on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Context {
    Host,
    Build,
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Context::Host => f.write_str("host"),
            Context::Build => f.write_str("build"),
        }
    }
}

/// Directed arc from consumer (`src`) to dependency (`dst`)
#[derive(Debug, Clone)]
pub struct Edge {
    pub src: NodeId,
    pub dst: NodeId,
    pub require: Requirement,
}

/// Name-and-context scoped view of nodes, used for diamond detection
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeClosure {
    nodes: BTreeMap<(String, Context), NodeId>,
}

impl NodeClosure {
    pub fn get(&self, name: &str, context: Context) -> Option<NodeId> {
        self.nodes.get(&(name.to_string(), context)).copied()
    }

    pub fn insert(&mut self, name: &str, context: Context, node: NodeId) {
        self.nodes.insert((name.to_string(), context), node);
    }

    pub fn contains_node(&self, node: NodeId) -> bool {
        self.nodes.values().any(|&n| n == node)
    }

    pub fn ids(&self) -> Vec<NodeId> {
        self.nodes.values().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Context, NodeId)> {
        self.nodes
            .iter()
            .map(|((name, context), &node)| (name.as_str(), *context, node))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Lockfile state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LockStatus {
    #[default]
    Unlocked,
    Locked,
    /// Rebuilt or re-exported in this run, written back as modified
    Modified,
}

/// A dependency recorded at a node once propagation reached it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitiveRequirement {
    pub require: Requirement,
    pub node: NodeId,
}

/// Inputs and result of the last recipe evaluation
#[derive(Debug, Clone)]
pub(crate) struct Evaluation {
    pub inputs: RecipeInputs,
    pub descriptor: RecipeDescriptor,
}

/// One (reference, context, configuration) instance in the graph
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub id: NodeId,

    /// Resolved reference, `None` for a virtual root
    pub reference: Option<Reference>,
    pub context: Context,
    pub package_type: PackageType,
    pub recipe: RecipeStatus,
    pub remote: Option<String>,
    pub location: Option<PathBuf>,
    pub display_name: String,

    /// Effective option values
    pub options: OptionValues,
    pub settings: Settings,

    /// Outgoing edges, in insertion order
    pub dependencies: Vec<EdgeId>,
    /// Incoming edges, in insertion order
    pub dependants: Vec<EdgeId>,

    pub public_closure: NodeClosure,
    pub public_deps: NodeClosure,
    pub inverse_closure: BTreeSet<NodeId>,
    /// Consumers (name and context) on the recursion paths reaching this node
    pub ancestors: BTreeSet<(String, Context)>,
    pub transitive_deps: Vec<TransitiveRequirement>,

    pub build_require: bool,
    pub private: bool,
    pub revision_pinned: bool,

    pub locked_id: Option<String>,
    pub lock_status: LockStatus,

    /// Filled by binary analysis or taken from a lockfile
    pub package_id: Option<String>,

    /// Working copy of the requirements, restored from the evaluation before
    /// every (re)configuration
    pub requires: RequirementSet,
    pub dep_options: DepOptions,

    pub(crate) assigned_options: OptionValues,
    /// option -> (value, package that set it)
    pub(crate) option_origins: BTreeMap<String, (String, String)>,
    pub(crate) locked_options: Option<OptionValues>,
    pub(crate) evaluation: Option<Evaluation>,
    pub(crate) evaluated_requires: Option<Vec<RequirementKey>>,
}

impl GraphNode {
    pub(crate) fn new(reference: Option<Reference>, context: Context, recipe: RecipeStatus) -> Self {
        let display_name = match &reference {
            Some(r) => r.to_string(),
            None => "virtual".to_string(),
        };
        Self {
            id: 0,
            reference,
            context,
            package_type: PackageType::Unknown,
            recipe,
            remote: None,
            location: None,
            display_name,
            options: OptionValues::new(),
            settings: Settings::new(),
            dependencies: Vec::new(),
            dependants: Vec::new(),
            public_closure: NodeClosure::default(),
            public_deps: NodeClosure::default(),
            inverse_closure: BTreeSet::new(),
            ancestors: BTreeSet::new(),
            transitive_deps: Vec::new(),
            build_require: false,
            private: false,
            revision_pinned: false,
            locked_id: None,
            lock_status: LockStatus::Unlocked,
            package_id: None,
            requires: RequirementSet::new(),
            dep_options: DepOptions::new(),
            assigned_options: OptionValues::new(),
            option_origins: BTreeMap::new(),
            locked_options: None,
            evaluation: None,
            evaluated_requires: None,
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.reference.as_ref().map(|r| r.name.as_str())
    }

    /// Reference text used for stable ordering and display
    pub fn ref_str(&self) -> String {
        self.reference
            .as_ref()
            .map(Reference::full_str)
            .unwrap_or_default()
    }

    pub fn is_virtual(&self) -> bool {
        self.recipe == RecipeStatus::Virtual
    }

    pub fn is_missing(&self) -> bool {
        self.recipe == RecipeStatus::Missing
    }

    pub fn is_locked(&self) -> bool {
        self.lock_status != LockStatus::Unlocked
    }

    pub fn transitive(&self, key: &RequirementKey) -> Option<&TransitiveRequirement> {
        self.transitive_deps.iter().find(|t| t.require.key() == *key)
    }

    pub(crate) fn set_transitive(&mut self, record: TransitiveRequirement) {
        let key = record.require.key();
        match self
            .transitive_deps
            .iter_mut()
            .find(|t| t.require.key() == key)
        {
            Some(slot) => *slot = record,
            None => self.transitive_deps.push(record),
        }
    }
}

impl fmt::Display for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_is_scoped_by_context() {
        let mut closure = NodeClosure::default();
        closure.insert("protobuf", Context::Host, 1);
        closure.insert("protobuf", Context::Build, 2);

        assert_eq!(closure.get("protobuf", Context::Host), Some(1));
        assert_eq!(closure.get("protobuf", Context::Build), Some(2));
        assert_eq!(closure.len(), 2);
        assert!(closure.contains_node(2));
    }

    #[test]
    fn test_transitive_records_replace_by_key() {
        let mut node = GraphNode::new(None, Context::Host, RecipeStatus::Virtual);
        let req = Requirement::parse("liba/1.0").unwrap();

        node.set_transitive(TransitiveRequirement { require: req.clone(), node: 1 });
        node.set_transitive(TransitiveRequirement {
            require: req.clone().with_run(true),
            node: 1,
        });
        node.set_transitive(TransitiveRequirement { require: req.as_build(), node: 2 });

        assert_eq!(node.transitive_deps.len(), 2);
        assert_eq!(node.transitive_deps[0].require.run, Some(true));
        assert_eq!(node.display_name, "virtual");
        assert!(node.is_virtual());
    }
}
