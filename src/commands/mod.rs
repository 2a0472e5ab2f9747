//! Command implementations
//!
//! Each command module provides a clap-derived struct and execute method.

pub mod graph;
pub mod lock;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

use ccgo_deps::config::DepsConfig;
use ccgo_deps::dependency::{BuilderSettings, DepsGraph, DepsGraphBuilder, GraphLock};
use ccgo_deps::GraphError;

use crate::utils::terminal::create_spinner;

/// Load deps.toml from an explicit path or the nearest parent directory
pub fn load_config(path: Option<&Path>) -> Result<(PathBuf, DepsConfig)> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => DepsConfig::find_config()?,
    };
    debug!("Loading configuration from {}", path.display());
    let config = DepsConfig::load_from(&path)?;
    Ok((path, config))
}

/// Load a lockfile, relaxed when partial resolution is requested
pub fn load_lock(path: &Path, partial: bool) -> Result<GraphLock> {
    let mut lock = GraphLock::load(path)
        .with_context(|| format!("Failed to load lockfile {}", path.display()))?;
    if partial {
        lock.set_relaxed(true);
    }
    Ok(lock)
}

/// Resolve the dependency graph declared by `config`
pub fn resolve_graph(
    config: &DepsConfig,
    settings: BuilderSettings,
    lock: Option<&GraphLock>,
) -> Result<DepsGraph, GraphError> {
    let index = config
        .to_index()
        .map_err(|e| GraphError::config_error(format!("{:#}", e), "Check the [[recipe]] entries"))?;
    let root = config
        .root()
        .map_err(|e| GraphError::config_error(format!("{:#}", e), "Check the [root] section"))?;

    let spinner = create_spinner("Resolving dependency graph...");
    let mut builder = DepsGraphBuilder::new(&index, &index, settings);
    if let Some(lock) = lock {
        builder = builder.with_lock(lock);
    }
    let result = builder.load_graph(root);
    spinner.finish_and_clear();
    result
}
