//! Lock command - Write the resolved graph to a lockfile
//!
//! Usage:
//!   ccgo-deps lock                                  # Resolve deps.toml, write deps.lock
//!   ccgo-deps lock -o out.lock                      # Custom output path
//!   ccgo-deps lock --lockfile deps.lock --partial   # Keep locked nodes, resolve new ones
//!   ccgo-deps lock --lockfile deps.lock --update-from ci.lock
//!                                                   # Merge modified nodes from another lock

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Args;
use tracing::info;

use ccgo_deps::dependency::GraphLock;

use super::{load_config, load_lock, resolve_graph};
use crate::utils::terminal::print_success;

/// Default lockfile name
pub const DEFAULT_LOCKFILE: &str = "deps.lock";

/// Resolve the dependency graph and write a lockfile
#[derive(Args, Debug)]
pub struct LockCommand {
    /// Path to deps.toml (default: search current and parent directories)
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Output lockfile
    #[arg(short = 'o', long, default_value = DEFAULT_LOCKFILE)]
    pub output: PathBuf,

    /// Existing lockfile to start from
    #[arg(long)]
    pub lockfile: Option<PathBuf>,

    /// Resolve requirements missing from the lockfile instead of failing
    #[arg(long)]
    pub partial: bool,

    /// Copy the nodes marked modified in this lockfile into the base lockfile
    #[arg(long, value_name = "FILE")]
    pub update_from: Option<PathBuf>,
}

impl LockCommand {
    /// Execute the lock command
    pub fn execute(self, _verbose: bool) -> Result<()> {
        if let Some(update_from) = &self.update_from {
            return self.update(update_from);
        }

        let (_, config) = load_config(self.config.as_deref())?;

        // A lockfile is only written for a complete graph
        let mut settings = config.builder_settings();
        settings.allow_error = false;

        let partial = self.partial || config.resolver.partial_lock;
        let previous = match &self.lockfile {
            Some(path) => Some(load_lock(path, partial)?),
            None => None,
        };

        let graph = resolve_graph(&config, settings, previous.as_ref())?;
        graph.check_buildable()?;

        let mut lock = GraphLock::from_graph(&graph, previous.as_ref());
        lock.set_relaxed(partial);
        lock.save(&self.output)
            .with_context(|| format!("Failed to write {}", self.output.display()))?;

        info!("Locked {} nodes", lock.nodes().len());
        print_success(&format!(
            "Wrote {} ({} packages)",
            self.output.display(),
            graph.nodes().len()
        ));
        Ok(())
    }

    fn update(&self, update_from: &Path) -> Result<()> {
        let base_path = self.lockfile.as_ref().unwrap_or(&self.output);
        let mut base = load_lock(base_path, self.partial)?;
        let new = load_lock(update_from, false)?;

        base.update_lock(&new)?;
        base.save(&self.output)
            .with_context(|| format!("Failed to write {}", self.output.display()))?;

        print_success(&format!(
            "Updated {} from {}",
            self.output.display(),
            update_from.display()
        ));
        Ok(())
    }
}
