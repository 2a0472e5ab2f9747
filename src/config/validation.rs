//! Configuration validation with helpful error messages
//!
//! Checks deps.toml content beyond what deserialization catches and
//! reports each problem with an actionable hint.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use regex::Regex;

use super::{DepsConfig, RecipeConfig, RequirementConfig};
use crate::dependency::builder::{DEFAULT_MAX_DEPTH, MAX_DEPTH_LIMIT};
use crate::error::GraphError;
use crate::reference::Reference;

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9_+.-]{1,100}$").expect("name pattern is valid")
    })
}

/// Validate the entire deps.toml configuration
pub fn validate_config(config: &DepsConfig) -> Result<()> {
    validate_root(config)?;

    let mut declared = BTreeSet::new();
    for recipe in &config.recipes {
        validate_recipe(recipe)
            .with_context(|| format!("Invalid recipe configuration for '{}'", recipe.reference))?;

        let reference = recipe.full_reference()?;
        if !declared.insert(reference.full_str()) {
            return Err(GraphError::config_error(
                format!("Recipe '{}' is declared more than once", reference.full_str()),
                "Each [[recipe]] entry must have a unique ref (and revision).",
            )
            .into());
        }
    }

    match config.resolver.max_depth {
        Some(0) => {
            return Err(GraphError::config_error(
                "[resolver] max_depth cannot be 0",
                format!(
                    "Set max_depth to a positive number or remove it to use the default ({})",
                    DEFAULT_MAX_DEPTH
                ),
            )
            .into());
        }
        Some(depth) if depth > MAX_DEPTH_LIMIT => {
            return Err(GraphError::config_error(
                format!("[resolver] max_depth {} is too large", depth),
                format!("max_depth can be at most {}", MAX_DEPTH_LIMIT),
            )
            .into());
        }
        _ => {}
    }

    Ok(())
}

fn validate_root(config: &DepsConfig) -> Result<()> {
    let root = &config.root;
    match (&root.name, &root.version) {
        (Some(name), Some(version)) => {
            validate_package_name(name)?;
            validate_version(version)?;
        }
        (None, None) => {}
        _ => {
            return Err(GraphError::config_error(
                "[root] must set both 'name' and 'version', or neither",
                "A named root is resolved as a recipe:\n\
                 [root]\n\
                 name = \"app\"\n\
                 version = \"1.0\"\n\
                 \n\
                 Without them the root only holds requirements.",
            )
            .into())
        }
    }

    for require in root
        .requires
        .iter()
        .chain(&root.build_requires)
        .chain(&root.test_requires)
    {
        validate_requirement(require).context("Invalid requirement in [root]")?;
    }

    Ok(())
}

fn validate_recipe(recipe: &RecipeConfig) -> Result<()> {
    let reference = parse_reference(&recipe.reference)?;
    validate_package_name(&reference.name)?;
    if reference.is_range() {
        return Err(GraphError::config_error(
            format!("Recipe '{}' cannot declare a version range", recipe.reference),
            "Recipes declare one concrete version, e.g. ref = \"zlib/1.3\".\n\
             Ranges belong in requirements: requires = [\"zlib/[>=1.2 <2.0]\"]",
        )
        .into());
    }
    if reference.revision.is_some() && recipe.revision.is_some() {
        return Err(GraphError::config_error(
            format!("Recipe '{}' declares its revision twice", recipe.reference),
            "Use either ref = \"name/version#rev\" or revision = \"rev\", not both.",
        )
        .into());
    }

    if let Some(alias) = &recipe.alias {
        let target = parse_reference(alias)?;
        if target == reference {
            return Err(GraphError::config_error(
                format!("Recipe '{}' is an alias of itself", recipe.reference),
                "An alias must point to a different version, e.g. alias = \"zlib/1.3\"",
            )
            .into());
        }
        if !recipe.requires.is_empty() || !recipe.build_requires.is_empty() {
            return Err(GraphError::config_error(
                format!("Alias recipe '{}' cannot have requirements", recipe.reference),
                "Move the requirements to the recipe the alias points to.",
            )
            .into());
        }
    }

    for name in recipe.options.keys() {
        if name.trim().is_empty() {
            return Err(GraphError::config_error(
                format!("Recipe '{}' declares an option with an empty name", recipe.reference),
                "Options are declared as options = { shared = \"False\" }",
            )
            .into());
        }
    }

    for require in recipe
        .requires
        .iter()
        .chain(&recipe.build_requires)
        .chain(&recipe.test_requires)
    {
        validate_requirement(require)?;
        if let RequirementConfig::Detailed(table) = require {
            if let Some(name) = table.when.keys().find(|name| !recipe.options.contains_key(*name)) {
                return Err(GraphError::config_error(
                    format!(
                        "Requirement '{}' depends on unknown option '{}'",
                        table.reference, name
                    ),
                    format!(
                        "Declare the option in the recipe: options = {{ {} = \"...\" }}",
                        name
                    ),
                )
                .into());
            }
        }
    }

    Ok(())
}

fn validate_requirement(require: &RequirementConfig) -> Result<()> {
    let reference = parse_reference(require.reference())?;
    validate_package_name(&reference.name)?;
    if let Some(expression) = reference.range_expression() {
        crate::dependency::version_resolver::VersionRange::parse(expression).with_context(|| {
            GraphError::config_error(
                format!("Invalid version range '{}'", reference.version),
                "Version ranges support:\n\
                 • Comparators: [>=1.0 <2.0]\n\
                 • Caret: [^1.0] (allows 1.x.x)\n\
                 • Tilde: [~1.2] (allows 1.2.x)\n\
                 • Alternatives: [~1.2 || ^3.0]\n\
                 • Pre-releases: [>=1.0, include_prerelease=True]",
            )
            .to_string()
        })?;
    }
    Ok(())
}

fn parse_reference(reference: &str) -> Result<Reference> {
    Reference::parse(reference).map_err(|e| {
        GraphError::config_error(
            e.to_string(),
            "References are written name/version[@user/channel][#revision]:\n\
             • zlib/1.3\n\
             • openssl/3.2.0@corp/stable\n\
             • fmt/[>=10.0 <11.0]",
        )
        .into()
    })
}

/// Validate package name
fn validate_package_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(GraphError::config_error(
            "Package name cannot be empty",
            "Provide a valid package name like 'zlib' or 'my-lib'",
        )
        .into());
    }

    if !name_pattern().is_match(name) {
        return Err(GraphError::config_error(
            format!("Package name '{}' is not valid", name),
            "Package name must:\n\
             • Be 2 to 101 characters long\n\
             • Start with a letter, digit or underscore\n\
             • Contain only letters, digits, '_', '+', '.' or '-'\n\
             • Examples: zlib, libjpeg-turbo, boost_system",
        )
        .into());
    }

    Ok(())
}

/// Validate the root version
fn validate_version(version: &str) -> Result<()> {
    if version.is_empty() || version.starts_with('[') || version.contains(char::is_whitespace) {
        return Err(GraphError::config_error(
            format!("Invalid root version '{}'", version),
            "The root version must be a single concrete version, e.g. '1.0' or '2.3.4'",
        )
        .into());
    }
    Ok(())
}
