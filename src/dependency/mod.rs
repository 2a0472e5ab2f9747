//! Dependency graph resolution
//!
//! This module expands a root recipe into a graph of package nodes, handling
//! diamonds, conflicts, loops, private and build requirements, version ranges,
//! aliases, overrides and lockfiles.

pub mod builder;
pub mod graph;
pub mod lockfile;
pub mod node;
pub mod package_type;
pub mod propagation;
pub mod requirement;
pub mod version_resolver;

pub use builder::{BuilderSettings, DepsGraphBuilder, Root};
pub use graph::{DepsGraph, GraphStats, Override};
pub use lockfile::{GraphLock, LockNode};
pub use node::{Context, Edge, GraphNode, LockStatus};
pub use package_type::{DeclaredType, PackageType};
pub use requirement::{Requirement, RequirementKey, RequirementSet};
pub use version_resolver::{VersionRange, VersionRangeResolver, VersionRequirement};
