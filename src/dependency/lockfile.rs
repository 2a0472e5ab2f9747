//! Lockfiles
//!
//! A lockfile captures a resolved graph so it can be rebuilt identically:
//!
//! ```json
//! {
//!   "version": "0.4",
//!   "graph_lock": {
//!     "nodes": {
//!       "0": { "options": {}, "requires": ["1"] },
//!       "1": { "ref": "liba/1.0#rev1", "package_id": "abc", "options": { "shared": "False" } }
//!     }
//!   },
//!   "relaxed": false
//! }
//! ```
//!
//! While building with a lock, [`GraphLock::pre_lock_node`] forces the
//! locked options of a node and [`GraphLock::lock_node`] pins its
//! requirements to the entries recorded for that node only.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use anyhow::{bail, Context as _, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::dependency::graph::DepsGraph;
use crate::dependency::node::{Context, GraphNode, LockStatus};
use crate::dependency::requirement::{Requirement, RequirementSet};
use crate::dependency::version_resolver::{parse_version_loose, VersionRange};
use crate::error::GraphError;
use crate::recipe::{OptionValues, RecipeStatus};
use crate::reference::Reference;

/// Lockfile format version
pub const LOCKFILE_VERSION: &str = "0.4";

fn is_false(value: &bool) -> bool {
    !*value
}

/// One locked node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockNode {
    /// Full reference with revision, absent for a virtual root
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,

    #[serde(default)]
    pub options: OptionValues,

    /// Ids of the host requirements
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,

    /// Ids of the build requirements
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build_requires: Vec<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub modified: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct LockNodes {
    nodes: BTreeMap<String, LockNode>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LockDocument {
    version: String,
    graph_lock: LockNodes,
    #[serde(default)]
    relaxed: bool,
}

/// Captured graph used to force deterministic resolution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GraphLock {
    nodes: BTreeMap<String, LockNode>,
    relaxed: bool,
}

impl GraphLock {
    /// Capture a resolved graph
    ///
    /// Nodes that were built from `previous` keep their locked ids, new nodes
    /// are numbered after the largest locked id. An id is never given to two
    /// nodes.
    pub fn from_graph(graph: &DepsGraph, previous: Option<&GraphLock>) -> Self {
        let locked_max = graph
            .nodes()
            .iter()
            .filter_map(|n| n.locked_id.as_deref())
            .chain(previous.into_iter().flat_map(|p| p.nodes.keys().map(String::as_str)))
            .filter_map(|id| id.parse::<usize>().ok())
            .max();
        let mut next = locked_max.map_or(0, |max| max + 1);

        let mut assigned = BTreeSet::new();
        let mut ids: Vec<String> = Vec::with_capacity(graph.nodes().len());
        for node in graph.nodes() {
            let id = match &node.locked_id {
                Some(id) if !assigned.contains(id) => id.clone(),
                locked => {
                    if let Some(id) = locked {
                        warn!("{}: lock id {} already taken, renumbering", node.display_name, id);
                    }
                    let id = next.to_string();
                    next += 1;
                    id
                }
            };
            assigned.insert(id.clone());
            ids.push(id);
        }

        let mut nodes = BTreeMap::new();
        for node in graph.nodes() {
            let mut requires = Vec::new();
            let mut build_requires = Vec::new();
            for &edge in &node.dependencies {
                let e = graph.edge(edge);
                if e.require.build {
                    build_requires.push(ids[e.dst].clone());
                } else {
                    requires.push(ids[e.dst].clone());
                }
            }

            nodes.insert(
                ids[node.id].clone(),
                LockNode {
                    reference: node.reference.clone(),
                    package_id: node.package_id.clone(),
                    options: node.options.clone(),
                    requires,
                    build_requires,
                    modified: node.lock_status == LockStatus::Modified,
                },
            );
        }

        Self {
            nodes,
            relaxed: previous.is_some_and(|p| p.relaxed),
        }
    }

    pub fn nodes(&self) -> &BTreeMap<String, LockNode> {
        &self.nodes
    }

    pub fn node(&self, id: &str) -> Option<&LockNode> {
        self.nodes.get(id)
    }

    /// Partial locks let requirements missing from the lock resolve live
    pub fn relaxed(&self) -> bool {
        self.relaxed
    }

    pub fn set_relaxed(&mut self, relaxed: bool) {
        self.relaxed = relaxed;
    }

    /// The unique id no other entry refers to
    pub fn root_node_id(&self) -> Result<String, GraphError> {
        let referenced: BTreeSet<&String> = self
            .nodes
            .values()
            .flat_map(|n| n.requires.iter().chain(&n.build_requires))
            .collect();
        let roots: Vec<&String> = self
            .nodes
            .keys()
            .filter(|id| !referenced.contains(id))
            .collect();

        match roots.as_slice() {
            [root] => Ok((*root).clone()),
            [] => Err(GraphError::lockfile("there is no root node")),
            _ => Err(GraphError::lockfile(format!(
                "there are several root nodes: {}",
                roots.iter().map(|r| r.as_str()).collect::<Vec<_>>().join(", ")
            ))),
        }
    }

    /// Apply the lock entry of a node before it is configured
    pub fn pre_lock_node(&self, node: &mut GraphNode) -> Result<(), GraphError> {
        let Some(id) = node.locked_id.clone() else {
            return Ok(());
        };
        let Some(locked) = self.nodes.get(&id) else {
            if self.relaxed || matches!(node.recipe, RecipeStatus::Consumer | RecipeStatus::Virtual)
            {
                node.locked_id = None;
                return Ok(());
            }
            return Err(GraphError::lock_mismatch(
                &node.display_name,
                format!("the node id {} was not found in the lockfile", id),
            ));
        };

        if let (Some(locked_ref), Some(reference)) = (&locked.reference, &node.reference) {
            if locked_ref.revision_conflicts(reference) {
                return Err(GraphError::lock_mismatch(
                    &node.display_name,
                    format!(
                        "the lockfile requires revision '{}'",
                        locked_ref.revision.as_deref().unwrap_or_default()
                    ),
                ));
            }
        }

        node.lock_status = if locked.modified {
            LockStatus::Modified
        } else {
            LockStatus::Locked
        };
        node.locked_options = Some(locked.options.clone());
        if !locked.modified {
            node.package_id = locked.package_id.clone();
        }
        Ok(())
    }

    /// Pin the requirements of a node to its own locked entries
    ///
    /// `bound` holds the ids already taken by graph nodes this node cannot
    /// converge on; a relaxed match never reuses them.
    pub fn lock_node(
        &self,
        node: &GraphNode,
        requires: &mut RequirementSet,
        bound: &BTreeSet<String>,
    ) -> Result<(), GraphError> {
        let locked = node.locked_id.as_ref().and_then(|id| self.nodes.get(id));
        let Some(locked) = locked else {
            if self.relaxed {
                for require in requires.iter_mut().filter(|r| !r.is_override) {
                    let context = if require.build {
                        Context::Build
                    } else {
                        node.context
                    };
                    self.match_relaxed(require, context, bound);
                }
            }
            return Ok(());
        };

        for build in [false, true] {
            let ids = if build {
                &locked.build_requires
            } else {
                &locked.requires
            };
            let mut scope: BTreeMap<&str, (&Reference, &String)> = BTreeMap::new();
            for id in ids {
                let Some(reference) = self.nodes.get(id).and_then(|n| n.reference.as_ref()) else {
                    return Err(GraphError::lockfile(format!(
                        "node {} refers to {} which has no reference",
                        node.locked_id.as_deref().unwrap_or_default(),
                        id
                    )));
                };
                scope.insert(reference.name.as_str(), (reference, id));
            }

            let kind = if build { "Build-require" } else { "Require" };
            let mut declared = BTreeSet::new();
            for require in requires
                .iter_mut()
                .filter(|r| r.build == build && !r.is_override)
            {
                declared.insert(require.name().to_string());
                match scope.get(require.name()) {
                    Some((reference, id)) => require.lock((*reference).clone(), id.as_str()),
                    None => {
                        let message =
                            format!("{} '{}' cannot be found in lockfile", kind, require.name());
                        if !self.relaxed {
                            return Err(GraphError::lock_mismatch(&node.display_name, message));
                        }
                        warn!("{}: {}", node.display_name, message);
                    }
                }
            }

            if !self.relaxed {
                if let Some((name, (reference, _))) =
                    scope.iter().find(|(name, _)| !declared.contains(**name))
                {
                    return Err(GraphError::lock_mismatch(
                        &node.display_name,
                        format!("locked requirement '{}' ({}) not found", reference, name),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Lock a requirement of an unlocked node to a compatible entry
    ///
    /// Only entries of the same `context` that are not in `bound` qualify.
    pub fn match_relaxed(
        &self,
        require: &mut Requirement,
        context: Context,
        bound: &BTreeSet<String>,
    ) -> bool {
        let wanted = &require.reference;
        let range = wanted
            .range_expression()
            .and_then(|expr| VersionRange::parse(expr).ok());
        let build_ids = self.build_context_ids();

        let found = self.nodes.iter().find_map(|(id, node)| {
            if bound.contains(id) {
                return None;
            }
            let entry_context = if build_ids.contains(id.as_str()) {
                Context::Build
            } else {
                Context::Host
            };
            if entry_context != context {
                return None;
            }
            let locked = node.reference.as_ref()?;
            if !locked.same_package(wanted) {
                return None;
            }
            let matches = match &range {
                Some(range) => parse_version_loose(&locked.version).is_some_and(|v| range.contains(&v)),
                None => locked == wanted && !locked.revision_conflicts(wanted),
            };
            matches.then(|| (locked.clone(), id.clone()))
        });

        match found {
            Some((reference, id)) => {
                require.lock(reference, id);
                true
            }
            None => false,
        }
    }

    /// Ids of the entries reached through a build requirement
    fn build_context_ids(&self) -> BTreeSet<&str> {
        let mut pending: Vec<&str> = self
            .nodes
            .values()
            .flat_map(|n| n.build_requires.iter().map(String::as_str))
            .collect();
        let mut found = BTreeSet::new();
        while let Some(id) = pending.pop() {
            if !found.insert(id) {
                continue;
            }
            if let Some(node) = self.nodes.get(id) {
                pending.extend(node.requires.iter().chain(&node.build_requires).map(String::as_str));
            }
        }
        found
    }

    /// Copy the entries modified in `new`, a lock branched off this one
    pub fn update_lock(&mut self, new: &GraphLock) -> Result<(), GraphError> {
        for (id, node) in new.nodes.iter().filter(|(_, n)| n.modified) {
            let Some(old) = self.nodes.get(id) else {
                return Err(GraphError::lockfile(format!(
                    "node {} does not exist in the lockfile being updated",
                    id
                )));
            };
            if old.modified {
                let compatible = match (&old.reference, &node.reference) {
                    (Some(a), Some(b)) => a == b && (a.revision.is_none() || !a.revision_conflicts(b)),
                    (None, None) => true,
                    _ => false,
                };
                if !compatible {
                    return Err(GraphError::lockfile(format!(
                        "Lockfile had already modified {}",
                        node.reference
                            .as_ref()
                            .map(Reference::full_str)
                            .unwrap_or_default()
                    )));
                }
            }
            self.nodes.insert(id.clone(), node.clone());
        }
        Ok(())
    }

    pub fn to_json(&self) -> Result<String> {
        let document = LockDocument {
            version: LOCKFILE_VERSION.to_string(),
            graph_lock: LockNodes {
                nodes: self.nodes.clone(),
            },
            relaxed: self.relaxed,
        };
        Ok(serde_json::to_string_pretty(&document)?)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let document: LockDocument =
            serde_json::from_str(content).context("Failed to parse lockfile JSON")?;
        if document.version != LOCKFILE_VERSION {
            bail!(
                "Unsupported lockfile version '{}', expected '{}'",
                document.version,
                LOCKFILE_VERSION
            );
        }
        Ok(Self {
            nodes: document.graph_lock.nodes,
            relaxed: document.relaxed,
        })
    }

    /// Load a lockfile from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read lockfile {}", path.display()))?;
        Self::from_json(&content).with_context(|| format!("Invalid lockfile {}", path.display()))
    }

    /// Write the lockfile to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_json()?;
        fs::write(path, content + "\n")
            .with_context(|| format!("Failed to write lockfile {}", path.display()))
    }
}
