//! CLI argument parsing using clap derive macros

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::commands::{graph::GraphCommand, lock::LockCommand};

/// ccgo-deps - dependency graph resolver for C++ packages
///
/// Expands the requirements declared in deps.toml into a full dependency
/// graph, detecting conflicts and loops, and writes reproducible lockfiles.
#[derive(Parser, Debug)]
#[command(name = "ccgo-deps")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve and display the dependency graph
    Graph(GraphCommand),

    /// Resolve the dependency graph and write a lockfile
    Lock(LockCommand),
}

impl Cli {
    /// Execute the CLI command
    pub fn execute(self) -> Result<()> {
        // Set up terminal colors
        if self.no_color {
            console::set_colors_enabled(false);
            console::set_colors_enabled_stderr(false);
        }

        match self.command {
            Commands::Graph(cmd) => cmd.execute(self.verbose),
            Commands::Lock(cmd) => cmd.execute(self.verbose),
        }
    }
}
