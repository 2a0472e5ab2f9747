//! deps.toml configuration parsing
//!
//! A deps.toml file declares the recipes known to the resolver, the root
//! package, the host/build profiles and resolver switches.
//!
//! ```toml
//! [root]
//! name = "app"
//! version = "1.0"
//! requires = ["libb/1.0", { ref = "liba/[>=1.0 <2.0]", private = true }]
//! build_requires = ["cmake/3.27"]
//!
//! [root.dep_options.liba]
//! shared = "True"
//!
//! [[recipe]]
//! ref = "liba/1.0"
//! package_type = "library"
//! options = { shared = "False" }
//!
//! [[recipe]]
//! ref = "libb/1.0"
//! requires = [{ ref = "liba/1.0", transitive_headers = true }]
//!
//! [profile.host.settings]
//! os = "Linux"
//!
//! [resolver]
//! allow_error = false
//! max_depth = 48
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::dependency::builder::{BuilderSettings, Root, DEFAULT_MAX_DEPTH};
use crate::dependency::package_type::DeclaredType;
use crate::dependency::requirement::{Requirement, RequirementSet};
use crate::error::{hints, GraphError};
use crate::recipe::index::ConditionalRequirement;
use crate::recipe::{DepOptions, OptionValues, RecipeDef, RecipeIndex, Settings};
use crate::reference::Reference;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "deps.toml";

/// Root configuration from deps.toml
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DepsConfig {
    /// The package the graph is built for
    #[serde(default)]
    pub root: RootConfig,

    /// Recipes known to the resolver
    #[serde(default, rename = "recipe")]
    pub recipes: Vec<RecipeConfig>,

    #[serde(default)]
    pub profile: ProfileConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,
}

/// The [root] section
///
/// With `name` and `version` the root is a consumer recipe; without them it
/// is a virtual root holding only requirements.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RootConfig {
    pub name: Option<String>,
    pub version: Option<String>,
    #[serde(default)]
    pub requires: Vec<RequirementConfig>,
    #[serde(default)]
    pub build_requires: Vec<RequirementConfig>,
    #[serde(default)]
    pub test_requires: Vec<RequirementConfig>,
    #[serde(default)]
    pub dep_options: DepOptions,
}

/// A [[recipe]] entry
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RecipeConfig {
    #[serde(rename = "ref")]
    pub reference: String,
    pub revision: Option<String>,
    pub remote: Option<String>,
    pub package_type: Option<DeclaredType>,
    /// Reference this recipe is an alias of
    pub alias: Option<String>,
    /// Declared options with their defaults
    #[serde(default)]
    pub options: OptionValues,
    /// Names of profile settings the recipe reads
    #[serde(default)]
    pub settings: Vec<String>,
    #[serde(default)]
    pub requires: Vec<RequirementConfig>,
    #[serde(default)]
    pub build_requires: Vec<RequirementConfig>,
    #[serde(default)]
    pub test_requires: Vec<RequirementConfig>,
    #[serde(default)]
    pub dep_options: DepOptions,
    #[serde(default)]
    pub editable: bool,
}

/// A requirement, either `"name/version"` or a table with traits
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RequirementConfig {
    Simple(String),
    Detailed(RequirementTable),
}

/// Requirement with explicit traits
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequirementTable {
    #[serde(rename = "ref")]
    pub reference: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default, rename = "override")]
    pub is_override: bool,
    pub visible: Option<bool>,
    pub headers: Option<bool>,
    pub libs: Option<bool>,
    pub run: Option<bool>,
    pub transitive_headers: Option<bool>,
    pub transitive_libs: Option<bool>,
    /// Only required when all these options have these values
    #[serde(default)]
    pub when: OptionValues,
}

/// Kind of requirement list an entry was declared in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequireKind {
    Regular,
    Build,
    Test,
}

impl RequirementConfig {
    pub fn reference(&self) -> &str {
        match self {
            RequirementConfig::Simple(reference) => reference,
            RequirementConfig::Detailed(table) => &table.reference,
        }
    }

    fn when(&self) -> OptionValues {
        match self {
            RequirementConfig::Simple(_) => OptionValues::new(),
            RequirementConfig::Detailed(table) => table.when.clone(),
        }
    }

    fn to_requirement(&self, kind: RequireKind) -> Result<Requirement> {
        let mut require = Requirement::parse(self.reference())?;
        if let RequirementConfig::Detailed(table) = self {
            require.private = table.private;
            require.is_override = table.is_override;
            require.visible = table.visible;
            require.headers = table.headers;
            require.libs = table.libs;
            require.run = table.run;
            require.transitive_headers = table.transitive_headers;
            require.transitive_libs = table.transitive_libs;
        }
        Ok(match kind {
            RequireKind::Regular => require,
            RequireKind::Build => require.as_build(),
            RequireKind::Test => require.as_test(),
        })
    }
}

/// [profile.host] and [profile.build]
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileConfig {
    #[serde(default)]
    pub host: ProfileSection,
    #[serde(default)]
    pub build: ProfileSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfileSection {
    #[serde(default)]
    pub settings: Settings,
}

/// The [resolver] section
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResolverConfig {
    #[serde(default)]
    pub allow_error: bool,
    #[serde(default)]
    pub update: bool,
    /// Resolve requirements missing from the lockfile instead of failing
    #[serde(default)]
    pub partial_lock: bool,
    pub max_depth: Option<usize>,
}

impl DepsConfig {
    /// Load deps.toml from the current directory
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Load and validate a configuration file
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    /// Parse and validate configuration content
    pub fn parse(content: &str) -> Result<Self> {
        let config: DepsConfig = toml::from_str(content).map_err(|e| {
            GraphError::config_error(e.to_string(), hints::invalid_deps_toml())
        })?;
        super::validation::validate_config(&config)?;
        Ok(config)
    }

    /// Find the configuration file in the current or parent directories
    pub fn find_config() -> Result<PathBuf> {
        let mut current = std::env::current_dir().context("Failed to get current directory")?;

        loop {
            let candidate = current.join(DEFAULT_CONFIG_FILE);
            if candidate.is_file() {
                return Ok(candidate);
            }
            if !current.pop() {
                bail!(
                    "Could not find {} in current directory or any parent directory",
                    DEFAULT_CONFIG_FILE
                );
            }
        }
    }

    /// Whether [root] names a consumer recipe
    pub fn has_root_recipe(&self) -> bool {
        self.root.name.is_some() && self.root.version.is_some()
    }

    fn root_reference(&self) -> Option<Reference> {
        match (&self.root.name, &self.root.version) {
            (Some(name), Some(version)) => Some(Reference::new(name.as_str(), version.as_str())),
            _ => None,
        }
    }

    /// Build the recipe index, including the root recipe when it is named
    pub fn to_index(&self) -> Result<RecipeIndex> {
        let mut index = RecipeIndex::new();

        for recipe in &self.recipes {
            let def = recipe
                .to_def()
                .with_context(|| format!("Invalid recipe '{}'", recipe.reference))?;
            index.add(def)?;
        }

        if let Some(reference) = self.root_reference() {
            let mut def = RecipeDef::new(reference);
            def.requires = root_requirements(&self.root)?;
            def.dep_options = self.root.dep_options.clone();
            index.add(def).context("The root package is also declared as a recipe")?;
        }

        Ok(index)
    }

    /// What the graph is built for
    pub fn root(&self) -> Result<Root> {
        if let Some(reference) = self.root_reference() {
            return Ok(Root::Recipe(reference));
        }

        let mut requires = RequirementSet::new();
        for conditional in root_requirements(&self.root)? {
            requires.add(conditional.requirement)?;
        }
        Ok(Root::Virtual {
            requires,
            dep_options: self.root.dep_options.clone(),
        })
    }

    /// Builder settings from [resolver] and [profile]
    pub fn builder_settings(&self) -> BuilderSettings {
        BuilderSettings {
            allow_error: self.resolver.allow_error,
            update: self.resolver.update,
            profile_host: self.profile.host.settings.clone(),
            profile_build: self.profile.build.settings.clone(),
            max_depth: self.resolver.max_depth.unwrap_or(DEFAULT_MAX_DEPTH),
        }
    }
}

impl RecipeConfig {
    /// Reference including the declared revision
    pub fn full_reference(&self) -> Result<Reference> {
        let reference = Reference::parse(&self.reference)?;
        Ok(match &self.revision {
            Some(revision) => reference.with_revision(revision.as_str()),
            None => reference,
        })
    }

    fn to_def(&self) -> Result<RecipeDef> {
        let mut def = RecipeDef::new(self.full_reference()?);
        def.remote = self.remote.clone();
        def.editable = self.editable;
        def.package_type = self.package_type;
        def.alias = self.alias.as_deref().map(Reference::parse).transpose()?;
        def.options = self.options.clone();
        def.settings = self.settings.clone();
        def.dep_options = self.dep_options.clone();
        def.requires = collect_requirements(
            &self.requires,
            &self.build_requires,
            &self.test_requires,
        )?;
        Ok(def)
    }
}

fn root_requirements(root: &RootConfig) -> Result<Vec<ConditionalRequirement>> {
    collect_requirements(&root.requires, &root.build_requires, &root.test_requires)
}

fn collect_requirements(
    requires: &[RequirementConfig],
    build_requires: &[RequirementConfig],
    test_requires: &[RequirementConfig],
) -> Result<Vec<ConditionalRequirement>> {
    let lists = [
        (requires, RequireKind::Regular),
        (build_requires, RequireKind::Build),
        (test_requires, RequireKind::Test),
    ];

    let mut result = Vec::new();
    for (list, kind) in lists {
        for entry in list {
            result.push(ConditionalRequirement {
                requirement: entry.to_requirement(kind)?,
                when: entry.when(),
            });
        }
    }
    Ok(result)
}
