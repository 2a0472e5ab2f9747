//! Dependency graph construction
//!
//! [`DepsGraphBuilder::load_graph`] expands a root depth-first. For every
//! requirement of a node it either creates a new node or converges on an
//! existing one (a diamond) found in the node's public scope:
//!
//! ```text
//!            app
//!           /   \
//!        libb   libc        libb and libc both require liba,
//!           \   /           a single liba node is shared
//!            liba
//! ```
//!
//! Private and build requirements open a new scope, so they may duplicate a
//! package that already exists elsewhere in the graph.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::anyhow;
use tracing::{debug, info, warn};

use crate::dependency::graph::{DepsGraph, Override};
use crate::dependency::lockfile::GraphLock;
use crate::dependency::node::{Context, EdgeId, Evaluation, GraphNode, NodeId};
use crate::dependency::package_type::PackageType;
use crate::dependency::propagation::{check_downstream_exists, propagate_downstream, propagate_through_edge};
use crate::dependency::requirement::{Requirement, RequirementKey, RequirementSet};
use crate::dependency::version_resolver::VersionRangeResolver;
use crate::error::GraphError;
use crate::recipe::{
    DepOptions, RecipeDescriptor, RecipeEvaluator, RecipeInputs, RecipeLookup, RecipeSource,
    RecipeStatus, Settings,
};
use crate::reference::Reference;

/// Default bound on the length of a dependency chain
pub const DEFAULT_MAX_DEPTH: usize = 64;

/// Hard bound on the length of a dependency chain
///
/// Expansion recurses several frames per level, this keeps the deepest
/// chain within a 2 MiB thread stack in debug builds.
pub const MAX_DEPTH_LIMIT: usize = 96;

/// Package -> option -> (value, package that set it)
type UpstreamOptions = BTreeMap<String, BTreeMap<String, (String, String)>>;

/// Builder configuration
#[derive(Debug, Clone)]
pub struct BuilderSettings {
    /// Record conflicts and missing recipes on the graph instead of failing
    pub allow_error: bool,
    /// Forwarded to the recipe source
    pub update: bool,
    pub profile_host: Settings,
    pub profile_build: Settings,
    pub max_depth: usize,
}

impl Default for BuilderSettings {
    fn default() -> Self {
        Self {
            allow_error: false,
            update: false,
            profile_host: Settings::new(),
            profile_build: Settings::new(),
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// What the graph is built for
#[derive(Debug, Clone)]
pub enum Root {
    /// A consumer recipe
    Recipe(Reference),
    /// Bare requirements, without recipe
    Virtual {
        requires: RequirementSet,
        dep_options: DepOptions,
    },
}

/// Builds a [`DepsGraph`] from a root
pub struct DepsGraphBuilder<'a> {
    source: &'a dyn RecipeSource,
    evaluator: &'a dyn RecipeEvaluator,
    resolver: VersionRangeResolver,
    settings: BuilderSettings,
    lock: Option<&'a GraphLock>,
    /// Nodes on the current recursion path
    path: Vec<NodeId>,
}

impl<'a> DepsGraphBuilder<'a> {
    pub fn new(
        source: &'a dyn RecipeSource,
        evaluator: &'a dyn RecipeEvaluator,
        settings: BuilderSettings,
    ) -> Self {
        Self {
            source,
            evaluator,
            resolver: VersionRangeResolver::new(),
            settings,
            lock: None,
            path: Vec::new(),
        }
    }

    /// Reproduce the graph recorded in a lockfile
    pub fn with_lock(mut self, lock: &'a GraphLock) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Build the whole graph for `root`
    ///
    /// In `allow_error` mode conflicts are recorded in [`DepsGraph::error`]
    /// and unknown recipes become missing nodes; the partial graph is
    /// returned for inspection.
    pub fn load_graph(&mut self, root: Root) -> Result<DepsGraph, GraphError> {
        self.path.clear();

        let mut root_node = match root {
            Root::Recipe(reference) => {
                let lookup = self
                    .source
                    .get_recipe(&reference, self.settings.update)
                    .map_err(|e| GraphError::recipe(&reference, e))?;
                if lookup.status == RecipeStatus::Missing {
                    return Err(GraphError::RecipeNotFound {
                        reference: reference.to_string(),
                        consumer: "root".to_string(),
                    });
                }
                let mut node =
                    GraphNode::new(Some(lookup.reference), Context::Host, RecipeStatus::Consumer);
                node.location = lookup.location;
                node.remote = lookup.remote;
                node
            }
            Root::Virtual {
                requires,
                dep_options,
            } => {
                let mut node = GraphNode::new(None, Context::Host, RecipeStatus::Virtual);
                node.evaluation = Some(Evaluation {
                    inputs: RecipeInputs::default(),
                    descriptor: RecipeDescriptor {
                        requirements: requires,
                        dep_options,
                        display_name: node.display_name.clone(),
                        ..RecipeDescriptor::default()
                    },
                });
                node
            }
        };

        if let Some(lock) = self.lock {
            root_node.locked_id = Some(lock.root_node_id()?);
        }

        let mut graph = DepsGraph::new(root_node);
        if let Some(name) = graph.root().name().map(str::to_string) {
            graph.node_mut(0).public_closure.insert(&name, Context::Host, 0);
        }

        debug!("Loading graph for {}", graph.root());
        self.expand_node(&mut graph, 0, &RequirementSet::new(), None, &UpstreamOptions::new(), None)?;
        Ok(graph)
    }

    /// Configure a node and expand its requirements
    ///
    /// `incoming` is the edge that created the node, its traits are completed
    /// and propagated once the node type is known.
    fn expand_node(
        &mut self,
        graph: &mut DepsGraph,
        id: NodeId,
        down_reqs: &RequirementSet,
        down_ref: Option<&str>,
        down_options: &UpstreamOptions,
        incoming: Option<EdgeId>,
    ) -> Result<(), GraphError> {
        let max_depth = self.settings.max_depth.min(MAX_DEPTH_LIMIT);
        if self.path.len() >= max_depth {
            return Err(GraphError::MaxDepth {
                depth: max_depth,
                reference: graph.node(id).display_name.clone(),
            });
        }

        self.path.push(id);
        let result = self.expand_node_inner(graph, id, down_reqs, down_ref, down_options, incoming);
        self.path.pop();
        result
    }

    fn expand_node_inner(
        &mut self,
        graph: &mut DepsGraph,
        id: NodeId,
        down_reqs: &RequirementSet,
        down_ref: Option<&str>,
        down_options: &UpstreamOptions,
        incoming: Option<EdgeId>,
    ) -> Result<(), GraphError> {
        let (new_reqs, new_options) =
            self.node_requirements(graph, id, down_reqs, down_ref, down_options)?;

        if let Some(edge) = incoming {
            let src = graph.edge(edge).src;
            let consumer_type = graph.node(src).package_type;
            let dep_type = graph.node(id).package_type;
            graph
                .edge_mut(edge)
                .require
                .process_package_type(consumer_type, dep_type);
            let require = graph.edge(edge).require.clone();
            if let Err(e) = propagate_downstream(graph, src, require, id) {
                return self.fail(graph, e);
            }
        }

        self.expand_requirements(graph, id, &new_reqs, &new_options)
    }

    /// Evaluate a node and compute what it passes to its dependencies
    fn node_requirements(
        &mut self,
        graph: &mut DepsGraph,
        id: NodeId,
        down_reqs: &RequirementSet,
        down_ref: Option<&str>,
        down_options: &UpstreamOptions,
    ) -> Result<(RequirementSet, UpstreamOptions), GraphError> {
        if let Some(lock) = self.lock {
            lock.pre_lock_node(graph.node_mut(id))?;
        }
        self.config_node(graph, id, down_ref, down_options)?;

        let mut requires = std::mem::take(&mut graph.node_mut(id).requires);

        for require in requires.iter_mut() {
            if let Some(target) = graph.aliased.get(&require.reference) {
                debug!("{}: using cached alias {} -> {}", graph.node(id), require.reference, target);
                require.reference = target.clone();
            }
        }

        if let Some(lock) = self.lock {
            let node = graph.node(id);
            let reachable: BTreeSet<NodeId> = node
                .public_deps
                .ids()
                .into_iter()
                .chain(node.public_closure.ids())
                .collect();
            let bound: BTreeSet<String> = graph
                .nodes()
                .iter()
                .filter(|n| !reachable.contains(&n.id))
                .filter_map(|n| n.locked_id.clone())
                .collect();
            lock.lock_node(node, &mut requires, &bound)?;
        }

        let consumer = graph.node(id).display_name.clone();
        let own_ref = graph.node(id).reference.clone();
        for (declared, forced) in requires.apply_overrides(down_reqs, own_ref.as_ref(), down_ref) {
            graph.overrides.push(Override {
                consumer: consumer.clone(),
                declared,
                forced,
                by: down_ref.unwrap_or_default().to_string(),
            });
        }

        for require in requires.iter_mut() {
            if require.locked_id.is_some() || !require.reference.is_range() {
                continue;
            }
            match self.resolver.resolve(require, &consumer, self.source) {
                Ok(()) => {}
                Err(e @ GraphError::RangeResolution { .. }) if self.settings.allow_error => {
                    warn!("{}", e);
                }
                Err(e) => return Err(e),
            }
        }

        let mut keys: Vec<RequirementKey> = requires.iter().map(Requirement::key).collect();
        keys.sort();

        let node = graph.node_mut(id);
        match &node.evaluated_requires {
            None => node.evaluated_requires = Some(keys),
            Some(previous) if *previous != keys => {
                let names = |keys: &[RequirementKey]| {
                    keys.iter()
                        .map(|k| k.name.clone())
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                return Err(GraphError::IncompatibleRequirements {
                    consumer: node.display_name.clone(),
                    previous: names(previous.as_slice()),
                    new: names(keys.as_slice()),
                });
            }
            Some(_) => {}
        }

        let new_reqs = requires.upstream(down_reqs, node.name());

        let mut new_options = UpstreamOptions::new();
        for (package, values) in &node.dep_options {
            new_options.entry(package.clone()).or_default().extend(
                values
                    .iter()
                    .map(|(k, v)| (k.clone(), (v.clone(), node.display_name.clone()))),
            );
        }
        for (package, values) in down_options {
            new_options
                .entry(package.clone())
                .or_default()
                .extend(values.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        if let Some(name) = node.name() {
            new_options.remove(name);
        }

        node.requires = requires;
        Ok((new_reqs, new_options))
    }

    /// Assign the downstream options and (re)evaluate the recipe
    ///
    /// Requirements are always restored from the evaluation, never reused
    /// from a previous expansion.
    fn config_node(
        &mut self,
        graph: &mut DepsGraph,
        id: NodeId,
        down_ref: Option<&str>,
        down_options: &UpstreamOptions,
    ) -> Result<(), GraphError> {
        let profile = match graph.node(id).context {
            Context::Host => self.settings.profile_host.clone(),
            Context::Build => self.settings.profile_build.clone(),
        };
        let node = graph.node_mut(id);

        if node.is_missing() {
            node.requires = RequirementSet::new();
            return Ok(());
        }

        let assigned = node.name().and_then(|name| down_options.get(name)).cloned();
        if let Some(values) = assigned {
            if node.locked_options.is_some() {
                let changed: Vec<&String> = values
                    .iter()
                    .filter(|(k, (v, _))| node.options.get(*k) != Some(v))
                    .map(|(k, _)| k)
                    .collect();
                if !changed.is_empty() {
                    warn!(
                        "{}: locked, ignoring options set by {}",
                        node.display_name,
                        down_ref.unwrap_or("the root")
                    );
                }
            } else {
                for (option, (value, origin)) in values {
                    if let Some((old_value, old_ref)) = node.option_origins.get(&option) {
                        if *old_value != value {
                            return Err(GraphError::OptionConflict {
                                consumer: origin,
                                package: node.display_name.clone(),
                                option,
                                value,
                                previous_value: old_value.clone(),
                                previous_consumer: old_ref.clone(),
                            });
                        }
                    }
                    node.assigned_options.insert(option.clone(), value.clone());
                    node.option_origins.insert(option, (value, origin));
                }
            }
        }

        if !node.is_virtual() {
            let inputs = RecipeInputs {
                options: node
                    .locked_options
                    .clone()
                    .unwrap_or_else(|| node.assigned_options.clone()),
                settings: profile,
            };
            let reuse = node.evaluation.as_ref().is_some_and(|e| e.inputs == inputs);
            if !reuse {
                let Some(reference) = node.reference.clone() else {
                    return Err(GraphError::recipe("virtual", anyhow!("node without reference")));
                };
                let descriptor = self
                    .evaluator
                    .evaluate(&reference, &inputs)
                    .map_err(|e| GraphError::recipe(&reference, e))?;
                debug!("{}: evaluated with options {:?}", node.display_name, inputs.options);
                node.evaluation = Some(Evaluation { inputs, descriptor });
            }
        }

        let Some(evaluation) = &node.evaluation else {
            return Ok(());
        };
        let descriptor = &evaluation.descriptor;
        let mut options = descriptor.options.clone();
        if let Some(locked) = &node.locked_options {
            options.extend(locked.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        node.package_type = PackageType::deduce(descriptor.package_type, &options);
        node.options = options;
        node.settings = descriptor.settings.clone();
        node.dep_options = descriptor.dep_options.clone();
        node.requires = descriptor.requirements.clone();
        Ok(())
    }

    fn expand_requirements(
        &mut self,
        graph: &mut DepsGraph,
        id: NodeId,
        new_reqs: &RequirementSet,
        new_options: &UpstreamOptions,
    ) -> Result<(), GraphError> {
        let requires: Vec<Requirement> = graph.node(id).requires.iter().cloned().collect();
        for mut require in requires {
            if require.is_override {
                continue;
            }
            if graph.error.is_some() {
                break;
            }
            self.expand_require(graph, id, &mut require, new_reqs, new_options)?;
            graph.node_mut(id).requires.set(require);
        }
        Ok(())
    }

    fn expand_require(
        &mut self,
        graph: &mut DepsGraph,
        node: NodeId,
        require: &mut Requirement,
        new_reqs: &RequirementSet,
        new_options: &UpstreamOptions,
    ) -> Result<(), GraphError> {
        let node_context = graph.node(node).context;
        let context = if require.build {
            Context::Build
        } else {
            node_context
        };
        let name = require.name().to_string();

        {
            let n = graph.node(node);
            let is_self = n.name() == Some(name.as_str()) && n.context == context;
            if is_self || n.ancestors.contains(&(name.clone(), context)) {
                let mut chain: Vec<String> = self
                    .path
                    .iter()
                    .map(|&p| graph.node(p).display_name.clone())
                    .collect();
                chain.push(require.reference.to_string());
                return Err(GraphError::Loop {
                    context,
                    consumer: n.display_name.clone(),
                    requirement: require.reference.to_string(),
                    chain,
                });
            }
        }

        // Overrides and options of the consumer stop at a context switch
        let (empty_reqs, empty_options) = (RequirementSet::new(), UpstreamOptions::new());
        let (new_reqs, new_options) = if context == node_context {
            (new_reqs, new_options)
        } else {
            (&empty_reqs, &empty_options)
        };

        let previous = graph.node(node).public_deps.get(&name, context);
        let previous_closure = graph.node(node).public_closure.get(&name, context);
        let isolated = require.build || require.private;

        match previous {
            Some(previous) if !(isolated && previous_closure.is_none()) => {
                self.close_diamond(graph, node, previous, require, new_reqs, new_options)
            }
            _ => self.add_new_node(graph, node, require, context, new_reqs, new_options),
        }
    }

    fn add_new_node(
        &mut self,
        graph: &mut DepsGraph,
        node: NodeId,
        require: &mut Requirement,
        context: Context,
        new_reqs: &RequirementSet,
        new_options: &UpstreamOptions,
    ) -> Result<(), GraphError> {
        if !require.build && !require.private {
            if let Some(found) = check_downstream_exists(graph, node, require) {
                let existing = graph.node(found.node);
                if existing.context == context
                    && found.require.is_visible()
                    && existing.reference.as_ref() != Some(&require.reference)
                {
                    let err = GraphError::Conflict {
                        consumer: graph.node(node).display_name.clone(),
                        requirement: require.reference.to_string(),
                        previous_consumer: graph.first_consumer(found.node),
                        previous: existing.ref_str(),
                        package: require.name().to_string(),
                    };
                    return self.fail(graph, err);
                }
            }
        }

        let lookup = self.resolve_recipe(graph, node, require)?;

        let reference = if lookup.reference.revision.is_none() {
            require.reference.clone()
        } else {
            lookup.reference.clone()
        };
        let mut new_node = GraphNode::new(Some(reference), context, lookup.status);
        new_node.location = lookup.location;
        new_node.remote = lookup.remote;
        new_node.revision_pinned = require.reference.revision.is_some();
        new_node.locked_id = require.locked_id.clone();
        {
            let parent = graph.node(node);
            new_node.ancestors = parent.ancestors.clone();
            if let Some(parent_name) = parent.name() {
                new_node.ancestors.insert((parent_name.to_string(), parent.context));
            }
            new_node.build_require = require.build || parent.build_require;
            new_node.private = require.private || parent.private;
        }

        let name = require.name().to_string();
        let new_id = graph.add_node(new_node);
        debug!("{}: new node {} ({})", graph.node(node), graph.node(new_id), context);

        graph.node_mut(new_id).public_closure.insert(&name, context, new_id);
        graph.connect_closure(node, new_id);
        if require.private || require.build {
            let mut deps = graph.node(node).public_closure.clone();
            deps.insert(&name, context, new_id);
            graph.node_mut(new_id).public_deps = deps;
        } else {
            let mut deps = graph.node(node).public_deps.clone();
            deps.insert(&name, context, new_id);
            graph.node_mut(new_id).public_deps = deps;
            for dependant in graph.node(node).inverse_closure.clone() {
                graph.connect_closure(dependant, new_id);
            }
        }

        let (edge, _) = graph.add_edge(node, new_id, require.clone());

        let down_ref = graph.node(node).display_name.clone();
        self.expand_node(graph, new_id, new_reqs, Some(&down_ref), new_options, Some(edge))
    }

    /// Find the recipe for a requirement, following alias recipes
    fn resolve_recipe(
        &mut self,
        graph: &mut DepsGraph,
        node: NodeId,
        require: &mut Requirement,
    ) -> Result<RecipeLookup, GraphError> {
        let mut chain: Vec<Reference> = Vec::new();
        let mut seen = BTreeSet::new();

        let lookup = loop {
            if !seen.insert(require.reference.clone()) {
                return Err(GraphError::recipe(
                    &require.reference,
                    anyhow!("Alias loop detected: {}", chain_text(&chain)),
                ));
            }
            let lookup = self
                .source
                .get_recipe(&require.reference, self.settings.update)
                .map_err(|e| GraphError::recipe(&require.reference, e))?;
            if lookup.status == RecipeStatus::Missing {
                break lookup;
            }
            let target = self
                .evaluator
                .alias(&lookup.reference)
                .map_err(|e| GraphError::recipe(&lookup.reference, e))?;
            match target {
                Some(target) => {
                    info!("{} is an alias of {}", require.reference, target);
                    chain.push(require.reference.clone());
                    require.reference = target;
                }
                None => break lookup,
            }
        };

        for alias in chain {
            graph.aliased.insert(alias, require.reference.clone());
        }

        if lookup.status == RecipeStatus::Missing {
            let err = GraphError::RecipeNotFound {
                reference: require.reference.to_string(),
                consumer: graph.node(node).display_name.clone(),
            };
            if !self.settings.allow_error {
                return Err(err);
            }
            warn!("{}", err);
        }
        Ok(lookup)
    }

    /// Converge `require` on the existing node `previous`
    fn close_diamond(
        &mut self,
        graph: &mut DepsGraph,
        node: NodeId,
        previous: NodeId,
        require: &mut Requirement,
        new_reqs: &RequirementSet,
        new_options: &UpstreamOptions,
    ) -> Result<(), GraphError> {
        if let Err(e) = self.check_conflict(graph, node, previous, require) {
            return self.fail(graph, e);
        }

        let mut union = graph.node(node).ancestors.clone();
        if let Some(name) = graph.node(node).name() {
            union.insert((name.to_string(), graph.node(node).context));
        }
        for n in graph.node(previous).public_closure.ids() {
            graph.node_mut(n).ancestors.extend(union.iter().cloned());
        }

        if graph.node(previous).private && !require.private {
            graph.make_public(previous);
        }

        graph.connect_closure(node, previous);
        let (edge, created) = graph.add_edge(node, previous, require.clone());
        debug!(
            "{}: {} edge to existing {}",
            graph.node(node),
            if created { "new" } else { "reused" },
            graph.node(previous)
        );

        for n in graph.node(previous).public_closure.ids() {
            let upstream = graph.node(n);
            if upstream.build_require || upstream.private {
                continue;
            }
            graph.connect_closure(node, n);
            for dependant in graph.node(node).inverse_closure.clone() {
                graph.connect_closure(dependant, n);
            }
        }

        if created {
            let consumer_type = graph.node(node).package_type;
            let dep_type = graph.node(previous).package_type;
            graph
                .edge_mut(edge)
                .require
                .process_package_type(consumer_type, dep_type);
            if let Err(e) = self.propagate_closing_loop(graph, edge) {
                return self.fail(graph, e);
            }
        }

        let strict_lock = self.lock.is_some_and(|lock| !lock.relaxed());
        if !strict_lock && self.should_recurse(graph, previous, new_reqs, new_options) {
            debug!("{}: expanding {} again", graph.node(node), graph.node(previous));
            let down_ref = graph.node(node).display_name.clone();
            self.expand_node(graph, previous, new_reqs, Some(&down_ref), new_options, None)?;
        }
        Ok(())
    }

    fn check_conflict(
        &self,
        graph: &DepsGraph,
        node: NodeId,
        previous: NodeId,
        require: &mut Requirement,
    ) -> Result<(), GraphError> {
        let prev = graph.node(previous);
        let Some(prev_ref) = prev.reference.as_ref() else {
            return Ok(());
        };

        if *prev_ref != require.reference {
            // The requirement may be an alias of the existing node
            let mut target = require.reference.clone();
            let mut seen = BTreeSet::new();
            while seen.insert(target.clone()) {
                match self.evaluator.alias(&target) {
                    Ok(Some(next)) => target = next,
                    _ => break,
                }
            }
            if target != *prev_ref {
                return Err(GraphError::Conflict {
                    consumer: graph.node(node).display_name.clone(),
                    requirement: require.reference.to_string(),
                    previous_consumer: graph.first_consumer(previous),
                    previous: prev_ref.to_string(),
                    package: require.name().to_string(),
                });
            }
            require.reference = target;
        }

        if prev_ref.revision_conflicts(&require.reference) {
            return Err(GraphError::RevisionConflict {
                consumer: graph.node(node).display_name.clone(),
                reference: prev_ref.to_string(),
                revision: require.reference.revision.clone().unwrap_or_default(),
                previous_revision: prev_ref.revision.clone().unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// Propagate the new edge, then everything already recorded at its target
    fn propagate_closing_loop(&self, graph: &mut DepsGraph, edge: EdgeId) -> Result<(), GraphError> {
        let (src, dst, require) = {
            let e = graph.edge(edge);
            (e.src, e.dst, e.require.clone())
        };
        propagate_downstream(graph, src, require, dst)?;
        for transitive in graph.node(dst).transitive_deps.clone() {
            propagate_through_edge(graph, edge, &transitive.require, transitive.node)?;
        }
        Ok(())
    }

    /// Whether downstream references or options differ from what the
    /// closure of `previous` was built with
    fn should_recurse(
        &self,
        graph: &DepsGraph,
        previous: NodeId,
        new_reqs: &RequirementSet,
        new_options: &UpstreamOptions,
    ) -> bool {
        let prev = graph.node(previous);
        let context = prev.context;
        let closure = &prev.public_closure;

        for require in new_reqs {
            if let Some(n) = closure.get(require.name(), context) {
                if graph.node(n).reference.as_ref() != Some(&require.reference) {
                    return true;
                }
            }
        }

        for (package, values) in new_options {
            let Some(n) = closure.get(package, context) else {
                continue;
            };
            let n = graph.node(n);
            if n.locked_options.is_some() {
                continue;
            }
            let differs = values
                .iter()
                .any(|(option, (value, _))| n.options.get(option).is_some_and(|v| v != value));
            if differs {
                return true;
            }
        }
        false
    }

    /// Raise, or record a conflict on the graph in inspection mode
    fn fail(&self, graph: &mut DepsGraph, error: GraphError) -> Result<(), GraphError> {
        if self.settings.allow_error && error.is_conflict() {
            warn!("{}", error);
            graph.error = Some(error);
            return Ok(());
        }
        Err(error)
    }
}

fn chain_text(chain: &[Reference]) -> String {
    chain
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependency::node::LockStatus;
    use crate::dependency::package_type::DeclaredType;
    use crate::recipe::{RecipeDef, RecipeIndex};

    fn r(s: &str) -> Reference {
        Reference::parse(s).unwrap()
    }

    fn req(s: &str) -> Requirement {
        Requirement::parse(s).unwrap()
    }

    fn make_index(recipes: Vec<RecipeDef>) -> RecipeIndex {
        let mut index = RecipeIndex::new();
        for recipe in recipes {
            index.add(recipe).unwrap();
        }
        index
    }

    fn recipe(s: &str) -> RecipeDef {
        RecipeDef::new(r(s))
    }

    fn virtual_root(requires: &[Requirement]) -> Root {
        Root::Virtual {
            requires: requires.iter().cloned().collect(),
            dep_options: DepOptions::new(),
        }
    }

    fn build(index: &RecipeIndex, root: Root) -> Result<DepsGraph, GraphError> {
        DepsGraphBuilder::new(index, index, BuilderSettings::default()).load_graph(root)
    }

    fn build_with(
        index: &RecipeIndex,
        settings: BuilderSettings,
        lock: Option<&GraphLock>,
        root: Root,
    ) -> Result<DepsGraph, GraphError> {
        let mut builder = DepsGraphBuilder::new(index, index, settings);
        if let Some(lock) = lock {
            builder = builder.with_lock(lock);
        }
        builder.load_graph(root)
    }

    fn id_of(graph: &DepsGraph, name: &str) -> NodeId {
        let found = graph.find(name);
        assert_eq!(found.len(), 1, "expected a single {} node", name);
        found[0].id
    }

    fn names(graph: &DepsGraph, ids: &[NodeId]) -> Vec<String> {
        ids.iter().map(|&id| graph.node(id).display_name.clone()).collect()
    }

    /// app -> libb -> liba, app -> libc -> liba
    fn diamond_index() -> RecipeIndex {
        make_index(vec![
            recipe("liba/1.0"),
            recipe("libb/1.0").require(req("liba/1.0")),
            recipe("libc/1.0").require(req("liba/1.0")),
            recipe("app/1.0").require(req("libb/1.0")).require(req("libc/1.0")),
        ])
    }

    #[test]
    fn test_diamond_converges() {
        let index = diamond_index();
        let graph = build(&index, Root::Recipe(r("app/1.0"))).unwrap();

        assert_eq!(graph.nodes().len(), 4);
        assert_eq!(graph.edges().len(), 4);
        let liba = id_of(&graph, "liba");
        assert_eq!(names(&graph, &graph.inverse_neighbors(liba)), vec!["libb/1.0", "libc/1.0"]);
        assert_eq!(graph.root().recipe, RecipeStatus::Consumer);

        // Both paths are known to liba for later loop checks
        let ancestors = &graph.node(liba).ancestors;
        for name in ["libb", "libc", "app"] {
            assert!(ancestors.contains(&(name.to_string(), Context::Host)));
        }
    }

    #[test]
    fn test_conflict_names_both_sides() {
        let index = make_index(vec![
            recipe("liba/1.0"),
            recipe("liba/2.0"),
            recipe("libb/1.0").require(req("liba/1.0")),
            recipe("libc/1.0").require(req("liba/2.0")),
            recipe("app/1.0").require(req("libb/1.0")).require(req("libc/1.0")),
        ]);

        let err = build(&index, Root::Recipe(r("app/1.0"))).unwrap_err();
        match &err {
            GraphError::Conflict {
                consumer,
                requirement,
                previous_consumer,
                previous,
                ..
            } => {
                assert_eq!(consumer, "libc/1.0");
                assert_eq!(requirement, "liba/2.0");
                assert_eq!(previous_consumer, "libb/1.0");
                assert_eq!(previous, "liba/1.0");
            }
            other => panic!("expected a conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_conflict_recorded_in_inspection_mode() {
        let index = make_index(vec![
            recipe("liba/1.0"),
            recipe("liba/2.0"),
            recipe("libb/1.0").require(req("liba/1.0")),
            recipe("libc/1.0").require(req("liba/2.0")),
        ]);
        let settings = BuilderSettings {
            allow_error: true,
            ..BuilderSettings::default()
        };

        let graph = build_with(
            &index,
            settings,
            None,
            virtual_root(&[req("libb/1.0"), req("libc/1.0")]),
        )
        .unwrap();
        assert!(graph.error.as_ref().is_some_and(GraphError::is_conflict));
        assert!(graph.check_buildable().is_err());
    }

    #[test]
    fn test_revision_conflict() {
        let index = make_index(vec![
            recipe("liba/1.0#r1"),
            recipe("libb/1.0").require(req("liba/1.0#r1")),
            recipe("libc/1.0").require(req("liba/1.0#r2")),
        ]);
        let err = build(&index, virtual_root(&[req("libb/1.0"), req("libc/1.0")])).unwrap_err();
        assert!(matches!(err, GraphError::RevisionConflict { .. }));
    }

    #[test]
    fn test_loop_detected() {
        let index = make_index(vec![
            recipe("liba/1.0").require(req("libc/1.0")),
            recipe("libc/1.0").require(req("libb/1.0")),
            recipe("libb/1.0").require(req("liba/1.0")),
        ]);

        let err = build(&index, virtual_root(&[req("liba/1.0")])).unwrap_err();
        match &err {
            GraphError::Loop { consumer, chain, .. } => {
                assert_eq!(consumer, "libb/1.0");
                assert_eq!(
                    chain,
                    &vec!["virtual", "liba/1.0", "libc/1.0", "libb/1.0", "liba/1.0"]
                );
            }
            other => panic!("expected a loop, got {:?}", other),
        }
    }

    #[test]
    fn test_self_reference_is_a_loop() {
        let index = make_index(vec![
            recipe("base/1.0"),
            recipe("base/2.0").require(req("base/1.0")),
        ]);
        let err = build(&index, Root::Recipe(r("base/2.0"))).unwrap_err();
        assert!(matches!(err, GraphError::Loop { .. }));
    }

    #[test]
    fn test_private_requirement_is_isolated() {
        let index = make_index(vec![
            recipe("liba/1.0"),
            recipe("libb/1.0").require(req("liba/1.0")),
            recipe("app/1.0").require(req("libb/1.0").as_private()),
            recipe("x/1.0").require(req("app/1.0")),
        ]);

        let graph = build(&index, Root::Recipe(r("x/1.0"))).unwrap();
        let closure = &graph.root().public_closure;
        assert!(closure.get("app", Context::Host).is_some());
        assert!(closure.get("libb", Context::Host).is_none());
        assert!(closure.get("liba", Context::Host).is_none());
        assert!(graph.node(id_of(&graph, "libb")).private);
        assert!(graph.node(id_of(&graph, "liba")).private, "private is sticky");

        // Invisible beyond the private edge
        let key = RequirementKey {
            name: "libb".into(),
            build: false,
        };
        assert!(graph.root().transitive(&key).is_none());
    }

    #[test]
    fn test_private_duplicates_sibling_package() {
        let index = make_index(vec![
            recipe("liba/1.0"),
            recipe("liba/2.0"),
            recipe("libb/1.0").require(req("liba/1.0")),
            recipe("libc/1.0").require(req("liba/2.0").as_private()),
        ]);

        let graph = build(&index, virtual_root(&[req("libb/1.0"), req("libc/1.0")])).unwrap();
        assert_eq!(graph.find("liba").len(), 2);
    }

    #[test]
    fn test_private_node_promoted_to_public() {
        let index = make_index(vec![
            recipe("liba/1.0"),
            recipe("libb/1.0").require(req("liba/1.0")),
            recipe("libd/1.0")
                .require(req("liba/1.0").as_private())
                .require(req("libb/1.0")),
        ]);

        let graph = build(&index, Root::Recipe(r("libd/1.0"))).unwrap();
        assert_eq!(graph.nodes().len(), 3);
        assert!(!graph.node(id_of(&graph, "liba")).private);
    }

    #[test]
    fn test_build_requirement_stickiness() {
        let index = make_index(vec![
            recipe("libx/1.0").package_type(DeclaredType::Shared),
            recipe("tool/1.0")
                .package_type(DeclaredType::Application)
                .require(req("libx/1.0")),
        ]);

        let graph = build(&index, virtual_root(&[req("tool/1.0").as_build()])).unwrap();
        let tool = graph.node(id_of(&graph, "tool"));
        let libx = graph.node(id_of(&graph, "libx"));
        assert_eq!(tool.context, Context::Build);
        assert_eq!(libx.context, Context::Build);
        assert!(tool.build_require && libx.build_require);

        let host_key = RequirementKey {
            name: "libx".into(),
            build: false,
        };
        let build_key = RequirementKey {
            name: "libx".into(),
            build: true,
        };
        assert!(graph.root().transitive(&host_key).is_none());
        let narrowed = graph.root().transitive(&build_key).unwrap();
        assert_eq!(narrowed.require.run, Some(true));
        assert!(!narrowed.require.is_visible());
    }

    #[test]
    fn test_host_and_build_contexts_do_not_conflict() {
        let index = make_index(vec![
            recipe("protobuf/3.0"),
            recipe("protobuf/3.1"),
            recipe("libb/1.0").require(req("protobuf/3.1")),
        ]);
        let graph = build(
            &index,
            virtual_root(&[req("libb/1.0"), req("protobuf/3.0").as_build()]),
        )
        .unwrap();
        let contexts: Vec<Context> = graph.find("protobuf").iter().map(|n| n.context).collect();
        assert_eq!(contexts.len(), 2);
        assert!(contexts.contains(&Context::Host) && contexts.contains(&Context::Build));
    }

    #[test]
    fn test_transitive_propagation_through_static() {
        let index = make_index(vec![
            recipe("liba/1.0").package_type(DeclaredType::Shared),
            recipe("libb/1.0")
                .package_type(DeclaredType::Static)
                .require(req("liba/1.0")),
        ]);

        let graph = build(&index, virtual_root(&[req("libb/1.0")])).unwrap();
        let key = RequirementKey {
            name: "liba".into(),
            build: false,
        };
        let record = graph.root().transitive(&key).unwrap();
        assert_eq!(record.node, id_of(&graph, "liba"));
        assert_eq!(
            (record.require.headers, record.require.libs, record.require.run),
            (Some(false), Some(true), Some(true))
        );
        assert!(!record.require.direct);
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let index = diamond_index();
        let inputs = RecipeInputs::default();
        let first = index.evaluate(&r("app/1.0"), &inputs).unwrap();
        let second = index.evaluate(&r("app/1.0"), &inputs).unwrap();
        assert_eq!(first.requirements, second.requirements);

        let a = build(&index, Root::Recipe(r("app/1.0"))).unwrap();
        let b = build(&index, Root::Recipe(r("app/1.0"))).unwrap();
        for (x, y) in a.nodes().iter().zip(b.nodes()) {
            assert_eq!(x.requires, y.requires);
        }
    }

    #[test]
    fn test_levels_are_deterministic() {
        let index = diamond_index();
        let graph = build(&index, Root::Recipe(r("app/1.0"))).unwrap();

        let levels = graph.by_levels();
        assert_eq!(levels, graph.by_levels());
        let named: Vec<Vec<String>> = levels.iter().map(|l| names(&graph, l)).collect();
        assert_eq!(
            named,
            vec![
                vec!["liba/1.0".to_string()],
                vec!["libb/1.0".to_string(), "libc/1.0".to_string()],
                vec!["app/1.0".to_string()],
            ]
        );
    }

    #[test]
    fn test_version_ranges_and_overrides() {
        let index = make_index(vec![
            recipe("liba/1.0"),
            recipe("liba/1.5"),
            recipe("liba/2.0"),
            recipe("libb/1.0").require(req("liba/[>=1.0 <2.0]")),
        ]);

        let graph = build(&index, virtual_root(&[req("libb/1.0")])).unwrap();
        assert_eq!(graph.node(id_of(&graph, "liba")).display_name, "liba/1.5");

        // A downstream requirement forces its version upstream
        let graph = build(&index, virtual_root(&[req("liba/1.0"), req("libb/1.0")])).unwrap();
        assert_eq!(graph.find("liba").len(), 1);
        assert_eq!(graph.node(id_of(&graph, "liba")).display_name, "liba/1.0");
        assert_eq!(graph.overrides.len(), 1);
        assert_eq!(graph.overrides[0].consumer, "libb/1.0");
        assert_eq!(graph.overrides[0].forced, r("liba/1.0"));
    }

    #[test]
    fn test_override_requirement_creates_no_edge() {
        let index = make_index(vec![
            recipe("liba/1.0"),
            recipe("liba/2.0"),
            recipe("libb/1.0").require(req("liba/1.0")),
        ]);

        let graph = build(
            &index,
            virtual_root(&[req("libb/1.0"), req("liba/2.0").as_override()]),
        )
        .unwrap();
        assert_eq!(graph.root().dependencies.len(), 1);
        assert_eq!(graph.node(id_of(&graph, "liba")).display_name, "liba/2.0");
    }

    #[test]
    fn test_range_failure() {
        let index = make_index(vec![recipe("liba/1.0"), recipe("libb/1.0").require(req("liba/[>=2.0]"))]);
        let err = build(&index, virtual_root(&[req("libb/1.0")])).unwrap_err();
        assert!(matches!(err, GraphError::RangeResolution { .. }));

        let settings = BuilderSettings {
            allow_error: true,
            ..BuilderSettings::default()
        };
        let graph = build_with(&index, settings, None, virtual_root(&[req("libb/1.0")])).unwrap();
        assert!(graph.node(id_of(&graph, "liba")).is_missing());
    }

    #[test]
    fn test_missing_recipe() {
        let index = make_index(vec![recipe("libb/1.0").require(req("liba/1.0"))]);
        let err = build(&index, virtual_root(&[req("libb/1.0")])).unwrap_err();
        match err {
            GraphError::RecipeNotFound { reference, consumer } => {
                assert_eq!(reference, "liba/1.0");
                assert_eq!(consumer, "libb/1.0");
            }
            other => panic!("expected missing recipe, got {:?}", other),
        }

        let settings = BuilderSettings {
            allow_error: true,
            ..BuilderSettings::default()
        };
        let graph = build_with(&index, settings, None, virtual_root(&[req("libb/1.0")])).unwrap();
        assert!(graph.error.is_none());
        assert!(graph.check_buildable().is_err());
    }

    #[test]
    fn test_aliases() {
        let index = make_index(vec![
            recipe("liba/1.1"),
            recipe("liba/latest").alias_of(r("liba/stable")),
            recipe("liba/stable").alias_of(r("liba/1.1")),
            recipe("libb/1.0").require(req("liba/latest")),
            recipe("libc/1.0").require(req("liba/1.1")),
        ]);

        let graph = build(&index, virtual_root(&[req("libb/1.0"), req("libc/1.0")])).unwrap();
        assert_eq!(graph.find("liba").len(), 1);
        assert_eq!(graph.aliased.get(&r("liba/latest")), Some(&r("liba/1.1")));
        assert_eq!(graph.aliased.get(&r("liba/stable")), Some(&r("liba/1.1")));

        let looping = make_index(vec![
            recipe("liba/x").alias_of(r("liba/y")),
            recipe("liba/y").alias_of(r("liba/x")),
        ]);
        let err = build(&looping, virtual_root(&[req("liba/x")])).unwrap_err();
        assert!(err.to_string().contains("Alias loop"));
    }

    #[test]
    fn test_options_flow_upstream_and_re_expand() {
        let index = make_index(vec![
            recipe("liba/1.0")
                .package_type(DeclaredType::Library)
                .option("shared", "False"),
            recipe("libb/1.0").require(req("liba/1.0")),
            recipe("libc/1.0")
                .require(req("liba/1.0"))
                .dep_option("liba", "shared", "True"),
        ]);

        let graph = build(&index, virtual_root(&[req("libb/1.0"), req("libc/1.0")])).unwrap();
        let liba = graph.node(id_of(&graph, "liba"));
        assert_eq!(liba.options["shared"], "True");
        assert_eq!(liba.package_type, PackageType::Shared);
    }

    #[test]
    fn test_option_conflict() {
        let index = make_index(vec![
            recipe("liba/1.0").option("shared", "False"),
            recipe("libb/1.0")
                .require(req("liba/1.0"))
                .dep_option("liba", "shared", "True"),
            recipe("libc/1.0")
                .require(req("liba/1.0"))
                .dep_option("liba", "shared", "False"),
        ]);

        let err = build(&index, virtual_root(&[req("libb/1.0"), req("libc/1.0")])).unwrap_err();
        match err {
            GraphError::OptionConflict {
                consumer,
                previous_consumer,
                value,
                previous_value,
                ..
            } => {
                assert_eq!(consumer, "libc/1.0");
                assert_eq!(previous_consumer, "libb/1.0");
                assert_eq!((value.as_str(), previous_value.as_str()), ("False", "True"));
            }
            other => panic!("expected option conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_root_options_win() {
        let index = make_index(vec![
            recipe("liba/1.0").option("shared", "False"),
            recipe("libb/1.0")
                .require(req("liba/1.0"))
                .dep_option("liba", "shared", "True"),
        ]);
        let mut dep_options = DepOptions::new();
        dep_options
            .entry("liba".into())
            .or_default()
            .insert("shared".into(), "False".into());

        let graph = build(
            &index,
            Root::Virtual {
                requires: [req("libb/1.0")].into_iter().collect(),
                dep_options,
            },
        )
        .unwrap();
        assert_eq!(graph.node(id_of(&graph, "liba")).options["shared"], "False");
    }

    #[test]
    fn test_incompatible_requirements_between_evaluations() {
        let index = make_index(vec![
            recipe("zlib/1.3"),
            recipe("liba/1.0")
                .option("with_zlib", "False")
                .require_when(req("zlib/1.3"), &[("with_zlib", "True")]),
            recipe("libb/1.0").require(req("liba/1.0")),
            recipe("libc/1.0")
                .require(req("liba/1.0"))
                .dep_option("liba", "with_zlib", "True"),
        ]);

        let err = build(&index, virtual_root(&[req("libb/1.0"), req("libc/1.0")])).unwrap_err();
        assert!(matches!(err, GraphError::IncompatibleRequirements { .. }));
    }

    #[test]
    fn test_max_depth() {
        let index = make_index(vec![
            recipe("a/1.0").require(req("b/1.0")),
            recipe("b/1.0").require(req("c/1.0")),
            recipe("c/1.0").require(req("d/1.0")),
            recipe("d/1.0"),
        ]);
        let settings = BuilderSettings {
            max_depth: 3,
            ..BuilderSettings::default()
        };
        let err = build_with(&index, settings, None, virtual_root(&[req("a/1.0")])).unwrap_err();
        assert!(matches!(err, GraphError::MaxDepth { depth: 3, .. }));
    }

    #[test]
    fn test_settings_follow_context() {
        let index = make_index(vec![
            recipe("zlib/1.3").setting("os"),
            recipe("cmake/3.20").setting("os"),
        ]);
        let mut settings = BuilderSettings::default();
        settings.profile_host.insert("os".into(), "Android".into());
        settings.profile_build.insert("os".into(), "Linux".into());

        let graph = build_with(
            &index,
            settings,
            None,
            virtual_root(&[req("zlib/1.3"), req("cmake/3.20").as_build()]),
        )
        .unwrap();
        assert_eq!(graph.node(id_of(&graph, "zlib")).settings["os"], "Android");
        assert_eq!(graph.node(id_of(&graph, "cmake")).settings["os"], "Linux");
    }

    #[test]
    fn test_lockfile_round_trip() {
        let index = make_index(vec![
            recipe("liba/1.0#r1").option("shared", "False"),
            recipe("libb/1.0").require(req("liba/[>=1.0]")),
            recipe("cmake/3.20"),
        ]);
        let root = || virtual_root(&[req("libb/1.0"), req("cmake/3.20").as_build()]);

        let mut graph = build(&index, root()).unwrap();
        for id in 0..graph.nodes().len() {
            graph.node_mut(id).package_id = Some(format!("pid{}", id));
        }
        let lock = GraphLock::from_graph(&graph, None);
        let lock = GraphLock::from_json(&lock.to_json().unwrap()).unwrap();

        let relocked = build_with(&index, BuilderSettings::default(), Some(&lock), root()).unwrap();
        assert_eq!(relocked.nodes().len(), graph.nodes().len());
        for (a, b) in graph.nodes().iter().zip(relocked.nodes()) {
            assert_eq!(a.ref_str(), b.ref_str());
            assert_eq!(a.package_id, b.package_id);
            assert_eq!(b.lock_status, LockStatus::Locked);
        }
        assert_eq!(relocked.node(id_of(&relocked, "liba")).ref_str(), "liba/1.0#r1");
    }

    #[test]
    fn test_lock_is_authoritative() {
        let old = make_index(vec![
            recipe("liba/1.0").option("shared", "False"),
            recipe("libb/1.0").require(req("liba/[>=1.0]")),
        ]);
        let root = || virtual_root(&[req("libb/1.0")]);
        let graph = build(&old, root()).unwrap();
        let lock = GraphLock::from_graph(&graph, None);

        // A newer version appears and a consumer now asks for other options
        let new = make_index(vec![
            recipe("liba/1.0").option("shared", "False"),
            recipe("liba/1.1").option("shared", "False"),
            recipe("libb/1.0")
                .require(req("liba/[>=1.0]"))
                .dep_option("liba", "shared", "True"),
        ]);
        let graph = build_with(&new, BuilderSettings::default(), Some(&lock), root()).unwrap();
        let liba = graph.node(id_of(&graph, "liba"));
        assert_eq!(liba.display_name, "liba/1.0");
        assert_eq!(liba.options["shared"], "False");

        let live = build(&new, root()).unwrap();
        assert_eq!(live.node(id_of(&live, "liba")).display_name, "liba/1.1");
    }

    #[test]
    fn test_strict_and_partial_locks() {
        let old = make_index(vec![recipe("liba/1.0")]);
        let graph = build(&old, virtual_root(&[req("liba/1.0")])).unwrap();
        let mut lock = GraphLock::from_graph(&graph, None);

        let new = make_index(vec![recipe("liba/1.0"), recipe("libn/1.0")]);
        let root = || virtual_root(&[req("liba/1.0"), req("libn/1.0")]);

        let err = build_with(&new, BuilderSettings::default(), Some(&lock), root()).unwrap_err();
        assert!(matches!(err, GraphError::LockfileMismatch { .. }));

        lock.set_relaxed(true);
        let graph = build_with(&new, BuilderSettings::default(), Some(&lock), root()).unwrap();
        assert_eq!(graph.nodes().len(), 3);
        assert!(graph.node(id_of(&graph, "liba")).is_locked());
        assert!(!graph.node(id_of(&graph, "libn")).is_locked());

        // New nodes are numbered after the locked ones
        let updated = GraphLock::from_graph(&graph, Some(&lock));
        assert_eq!(updated.nodes().len(), 3);
        assert!(updated.node("2").is_some());
        assert!(updated.relaxed());
    }

    #[test]
    fn test_modified_nodes_keep_their_mark() {
        let index = make_index(vec![recipe("liba/1.0")]);
        let root = || virtual_root(&[req("liba/1.0")]);
        let mut graph = build(&index, root()).unwrap();
        let liba = id_of(&graph, "liba");
        graph.node_mut(liba).package_id = Some("old".into());
        graph.mark_modified(liba);

        let lock = GraphLock::from_graph(&graph, None);
        assert!(lock.node("1").unwrap().modified);

        let relocked = build_with(&index, BuilderSettings::default(), Some(&lock), root()).unwrap();
        let liba = relocked.node(id_of(&relocked, "liba"));
        assert_eq!(liba.lock_status, LockStatus::Modified);
        assert_eq!(liba.package_id, None, "modified nodes get a fresh package id");
    }

    fn options_root(requires: &[Requirement], package: &str, option: &str, value: &str) -> Root {
        let mut dep_options = DepOptions::new();
        dep_options
            .entry(package.into())
            .or_default()
            .insert(option.into(), value.into());
        Root::Virtual {
            requires: requires.iter().cloned().collect(),
            dep_options,
        }
    }

    #[test]
    fn test_build_context_ignores_host_overrides_and_options() {
        let index = make_index(vec![
            recipe("zlib/1.2").option("shared", "False"),
            recipe("zlib/1.3").option("shared", "False"),
            recipe("tool/1.0")
                .package_type(DeclaredType::Application)
                .require(req("zlib/1.2")),
        ]);
        let root = options_root(
            &[req("zlib/1.3"), req("tool/1.0").as_build()],
            "zlib",
            "shared",
            "True",
        );

        let graph = build(&index, root).unwrap();
        let zlibs = graph.find("zlib");
        assert_eq!(zlibs.len(), 2);
        let host = zlibs.iter().find(|n| n.context == Context::Host).unwrap();
        let tool_zlib = zlibs.iter().find(|n| n.context == Context::Build).unwrap();
        assert_eq!(host.display_name, "zlib/1.3");
        assert_eq!(host.options["shared"], "True");
        assert_eq!(tool_zlib.display_name, "zlib/1.2");
        assert_eq!(tool_zlib.options["shared"], "False");
        assert!(graph.overrides.is_empty());
    }

    #[test]
    fn test_build_requirement_on_own_name() {
        // Cross building needs the build-context protoc of the same package
        let index = make_index(vec![recipe("protobuf/3.21")
            .option("cross_build", "False")
            .require_when(req("protobuf/3.21").as_build(), &[("cross_build", "True")])]);
        let root = options_root(&[req("protobuf/3.21")], "protobuf", "cross_build", "True");

        let graph = build(&index, root).unwrap();
        let contexts: Vec<Context> = graph.find("protobuf").iter().map(|n| n.context).collect();
        assert_eq!(contexts, vec![Context::Host, Context::Build]);
        assert_eq!(graph.edges().len(), 2);
    }

    #[test]
    fn test_option_conflict_names_the_setter() {
        let index = make_index(vec![
            recipe("liba/1.0").option("shared", "False"),
            recipe("libmid/1.0").require(req("liba/1.0")),
            recipe("libtop/1.0")
                .require(req("libmid/1.0"))
                .dep_option("liba", "shared", "True"),
            recipe("libc/1.0")
                .require(req("liba/1.0"))
                .dep_option("liba", "shared", "False"),
        ]);

        let err = build(&index, virtual_root(&[req("libtop/1.0"), req("libc/1.0")])).unwrap_err();
        match err {
            GraphError::OptionConflict {
                consumer,
                previous_consumer,
                ..
            } => {
                assert_eq!(consumer, "libc/1.0");
                assert_eq!(previous_consumer, "libtop/1.0");
            }
            other => panic!("expected option conflict, got {:?}", other),
        }
    }

    /// pkg0 -> pkg1 -> ... -> pkg{len - 1}
    fn chain_index(len: usize) -> RecipeIndex {
        make_index(
            (0..len)
                .map(|i| {
                    let def = recipe(&format!("pkg{}/1.0", i));
                    if i + 1 < len {
                        def.require(req(&format!("pkg{}/1.0", i + 1)))
                    } else {
                        def
                    }
                })
                .collect(),
        )
    }

    #[test]
    fn test_default_depth_fits_the_stack() {
        let index = chain_index(DEFAULT_MAX_DEPTH - 1);
        let graph = build(&index, virtual_root(&[req("pkg0/1.0")])).unwrap();
        assert_eq!(graph.nodes().len(), DEFAULT_MAX_DEPTH);

        let index = chain_index(MAX_DEPTH_LIMIT + 4);
        let settings = BuilderSettings {
            max_depth: usize::MAX,
            ..BuilderSettings::default()
        };
        let err = build_with(&index, settings, None, virtual_root(&[req("pkg0/1.0")])).unwrap_err();
        assert!(matches!(err, GraphError::MaxDepth { depth: MAX_DEPTH_LIMIT, .. }));
    }

    #[test]
    fn test_partial_lock_keeps_build_entry_apart() {
        let old = make_index(vec![recipe("liba/1.0"), recipe("protobuf/3.0")]);
        let graph = build(
            &old,
            virtual_root(&[req("liba/1.0"), req("protobuf/3.0").as_build()]),
        )
        .unwrap();
        let mut lock = GraphLock::from_graph(&graph, None);
        lock.set_relaxed(true);
        assert!(lock.node("2").unwrap().reference.as_ref().is_some_and(|r| r.name == "protobuf"));

        let new = make_index(vec![
            recipe("liba/1.0"),
            recipe("protobuf/3.0"),
            recipe("libn/1.0").require(req("protobuf/3.0")),
        ]);
        let root = virtual_root(&[
            req("liba/1.0"),
            req("libn/1.0"),
            req("protobuf/3.0").as_build(),
        ]);
        let graph = build_with(&new, BuilderSettings::default(), Some(&lock), root).unwrap();
        assert_eq!(graph.nodes().len(), 5);

        let protobufs = graph.find("protobuf");
        let host = protobufs.iter().find(|n| n.context == Context::Host).unwrap();
        let tool = protobufs.iter().find(|n| n.context == Context::Build).unwrap();
        assert_eq!(host.locked_id, None);
        assert_eq!(tool.locked_id.as_deref(), Some("2"));

        let updated = GraphLock::from_graph(&graph, Some(&lock));
        assert_eq!(updated.nodes().len(), graph.nodes().len());
    }

    #[test]
    fn test_partial_lock_wins_after_re_expansion() {
        let old = make_index(vec![
            recipe("zlib/1.0"),
            recipe("liba/1.0")
                .option("shared", "False")
                .require(req("zlib/[>=1.0]")),
            recipe("libb/1.0").require(req("liba/1.0")),
        ]);
        let graph = build(&old, virtual_root(&[req("libb/1.0")])).unwrap();
        let mut lock = GraphLock::from_graph(&graph, None);
        lock.set_relaxed(true);

        // libc is new: it asks for a newer zlib and other options on the
        // locked liba, which makes the diamond on liba expand it again
        let new = make_index(vec![
            recipe("zlib/1.0"),
            recipe("zlib/1.1"),
            recipe("liba/1.0")
                .option("shared", "False")
                .require(req("zlib/[>=1.0]")),
            recipe("libb/1.0").require(req("liba/1.0")),
            recipe("libc/1.0")
                .require(req("liba/1.0"))
                .require(req("zlib/1.1").as_override())
                .dep_option("liba", "shared", "True"),
        ]);
        let graph = build_with(
            &new,
            BuilderSettings::default(),
            Some(&lock),
            virtual_root(&[req("libb/1.0"), req("libc/1.0")]),
        )
        .unwrap();

        assert_eq!(graph.nodes().len(), 5);
        let liba = graph.node(id_of(&graph, "liba"));
        assert!(liba.is_locked());
        assert_eq!(liba.options["shared"], "False");
        let zlib = graph.node(id_of(&graph, "zlib"));
        assert_eq!(zlib.display_name, "zlib/1.0");
        assert!(zlib.is_locked());
        assert!(graph.overrides.is_empty());
        assert!(!graph.node(id_of(&graph, "libc")).is_locked());
    }
}
