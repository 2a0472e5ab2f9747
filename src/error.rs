//! Error types and helpers for user-friendly error messages
//!
//! Every graph error names the offending references and the consumers that
//! required them, and carries an actionable hint.

use thiserror::Error;

use crate::dependency::builder::MAX_DEPTH_LIMIT;
use crate::dependency::node::Context;

/// Errors raised while building or using a dependency graph
#[derive(Error, Debug)]
pub enum GraphError {
    /// A requirement closes a cycle on the current recursion path
    #[error(
        "Loop detected in context {context}: '{consumer}' requires '{requirement}' which is an ancestor too\n    {}",
        .chain.join(" -> ")
    )]
    Loop {
        context: Context,
        consumer: String,
        requirement: String,
        chain: Vec<String>,
    },

    /// Two requirements for the same package resolve to different versions
    #[error(
        "Conflict in {consumer}:\n    '{consumer}' requires '{requirement}' while '{previous_consumer}' requires '{previous}'.\n    To fix this conflict you need to override the package '{package}' in your root package."
    )]
    Conflict {
        consumer: String,
        requirement: String,
        previous_consumer: String,
        previous: String,
        package: String,
    },

    /// Two requirements pin different revisions of the same reference
    #[error(
        "Conflict in {consumer}:\n    Different revisions of {reference} have been requested ('{revision}' and '{previous_revision}')"
    )]
    RevisionConflict {
        consumer: String,
        reference: String,
        revision: String,
        previous_revision: String,
    },

    /// A consumer tries to change an option already assigned by another one
    #[error(
        "{consumer} tried to change {package} option {option} to {value}\nbut it was already assigned to {previous_value} by {previous_consumer}"
    )]
    OptionConflict {
        consumer: String,
        package: String,
        option: String,
        value: String,
        previous_value: String,
        previous_consumer: String,
    },

    /// No candidate satisfies a version range
    #[error("Version range '{range}' from requirement '{requirement}' required by '{consumer}' could not be resolved")]
    RangeResolution {
        range: String,
        requirement: String,
        consumer: String,
    },

    /// The recipe source does not know the reference
    #[error("Package '{reference}' not found, required by '{consumer}'")]
    RecipeNotFound { reference: String, consumer: String },

    /// A lockfile entry needed by a node is missing or inconsistent
    #[error("Lockfile mismatch in '{node}': {message}")]
    LockfileMismatch { node: String, message: String },

    /// A lockfile document is malformed
    #[error("Invalid lockfile: {message}")]
    Lockfile { message: String },

    /// A recipe collaborator failed
    #[error("Error evaluating '{reference}': {source}")]
    Recipe {
        reference: String,
        #[source]
        source: anyhow::Error,
    },

    /// Evaluating a recipe again produced a different set of requirements
    #[error(
        "{consumer}: Incompatible requirements obtained in different evaluations\n    Previous requirements: [{previous}]\n    New requirements: [{new}]"
    )]
    IncompatibleRequirements {
        consumer: String,
        previous: String,
        new: String,
    },

    /// The dependency chain is deeper than allowed
    #[error("Maximum dependency depth ({depth}) exceeded while expanding '{reference}'")]
    MaxDepth { depth: usize, reference: String },

    /// The graph cannot be used to build or lock
    #[error("The dependency graph cannot be used: {reason}")]
    Unbuildable { reason: String },

    /// Invalid configuration file content
    #[error("Configuration error: {message}")]
    Config { message: String, hint: String },
}

impl GraphError {
    pub(crate) fn recipe(reference: impl ToString, source: anyhow::Error) -> Self {
        Self::Recipe {
            reference: reference.to_string(),
            source,
        }
    }

    pub(crate) fn lockfile(message: impl Into<String>) -> Self {
        Self::Lockfile {
            message: message.into(),
        }
    }

    pub(crate) fn lock_mismatch(node: impl ToString, message: impl Into<String>) -> Self {
        Self::LockfileMismatch {
            node: node.to_string(),
            message: message.into(),
        }
    }

    /// Create a configuration error with a hint
    pub fn config_error(message: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            hint: hint.into(),
        }
    }

    /// Conflicts can be recorded on the graph in inspection mode
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            GraphError::Conflict { .. } | GraphError::RevisionConflict { .. }
        )
    }

    /// Actionable suggestion for the user
    pub fn hint(&self) -> String {
        match self {
            GraphError::Loop { .. } => hints::loop_detected().to_string(),
            GraphError::Conflict { package, .. } => format!(
                "Add an explicit requirement (or an override requirement) for '{}' \
                 in the root package to choose one version for the whole graph.",
                package
            ),
            GraphError::RevisionConflict { reference, .. } => format!(
                "Pin the same revision of '{}' everywhere, or remove the revision \
                 from one of the requirements.",
                reference
            ),
            GraphError::OptionConflict {
                package, option, ..
            } => format!(
                "Set '{}:{}' once, in the closest common consumer (usually the root \
                 package), so all consumers agree.",
                package, option
            ),
            GraphError::RangeResolution { .. } => hints::range_resolution().to_string(),
            GraphError::RecipeNotFound { .. } => hints::recipe_not_found().to_string(),
            GraphError::LockfileMismatch { .. } => hints::lockfile_mismatch().to_string(),
            GraphError::Lockfile { .. } => hints::invalid_lockfile().to_string(),
            GraphError::Recipe { .. } => {
                "Check the recipe declaration (requirements, options and alias) for errors."
                    .to_string()
            }
            GraphError::IncompatibleRequirements { .. } => {
                "Requirements must not depend on option values that change while the graph \
                 is being expanded. Set those options in the root package instead."
                    .to_string()
            }
            GraphError::MaxDepth { .. } => format!(
                "Raise [resolver] max_depth (at most {}) if this dependency chain is legitimate.",
                MAX_DEPTH_LIMIT
            ),
            GraphError::Unbuildable { .. } => {
                "Fix the reported errors first. Use 'graph --allow-error' to inspect the \
                 partial graph."
                    .to_string()
            }
            GraphError::Config { hint, .. } => hint.clone(),
        }
    }

    /// Display error with formatting and hints
    pub fn display_with_hints(&self) {
        use console::style;

        eprintln!("\n{} {}", style("ERROR:").red().bold(), self);
        eprintln!("\n{} {}", style("HINT:").yellow().bold(), self.hint());

        if let GraphError::Loop { chain, .. } = self {
            if !chain.is_empty() {
                eprintln!("\n{}", style("CHAIN:").cyan().bold());
                for step in chain {
                    eprintln!("  • {}", step);
                }
            }
        }

        eprintln!();
    }
}

/// Common error hints
pub mod hints {
    pub fn loop_detected() -> &'static str {
        "A package cannot depend on itself, directly or through its dependencies.\n\
         • Remove the requirement that closes the cycle\n\
         • For bootstrapping (a package built with an older version of itself), \
         use a build requirement"
    }

    pub fn range_resolution() -> &'static str {
        "No available version satisfies the range. Try:\n\
         • Check the range syntax, e.g. [>=1.0 <2.0], [~1.2], [^1.0]\n\
         • Check the declared recipes for that package\n\
         • Use 'graph --allow-error' to inspect the rest of the graph"
    }

    pub fn recipe_not_found() -> &'static str {
        "The recipe could not be found in the cache or any remote.\n\
         • Check the package name and version\n\
         • Declare the recipe in deps.toml"
    }

    pub fn lockfile_mismatch() -> &'static str {
        "The lockfile is out of sync with the recipes.\n\
         \n\
         To fix:\n\
         • Run: ccgo-deps lock to regenerate it\n\
         • Or use --partial to resolve new requirements live"
    }

    pub fn invalid_lockfile() -> &'static str {
        "The lockfile could not be understood. Regenerate it with: ccgo-deps lock"
    }

    pub fn invalid_deps_toml() -> &'static str {
        "deps.toml is invalid. Common issues:\n\
         • Invalid TOML syntax (check quotes, brackets, commas)\n\
         • Malformed reference (expected name/version[@user/channel][#revision])\n\
         • Unknown package_type"
    }
}
