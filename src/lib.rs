//! ccgo-deps - dependency graph resolution for ccgo C++ packages
//!
//! Builds the full dependency graph of a package from its recipes:
//!
//! ```text
//! deps.toml → RecipeIndex → DepsGraphBuilder → DepsGraph → lockfile / tree / levels
//! ```

pub mod config;
pub mod dependency;
pub mod error;
pub mod recipe;
pub mod reference;

pub use error::GraphError;
pub use reference::Reference;
