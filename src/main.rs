//! ccgo-deps CLI - dependency graph resolution for ccgo C++ packages
//!
//! ## Architecture
//!
//! ```text
//! Rust CLI → commands/ → ccgo_deps (config → recipe index → graph builder → lockfile)
//! ```

mod cli;
mod commands;
mod utils;

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use ccgo_deps::GraphError;
use cli::Cli;

/// Environment variable holding the log filter, e.g. `ccgo_deps=debug`
const LOG_ENV: &str = "CCGO_DEPS_LOG";

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_level));

    // Logs go to stderr so command output stays parseable
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .try_init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.execute() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<GraphError>() {
                Some(graph_error) => graph_error.display_with_hints(),
                None => eprintln!(
                    "{} {:#}",
                    console::style("ERROR:").red().bold(),
                    err
                ),
            }
            ExitCode::FAILURE
        }
    }
}
