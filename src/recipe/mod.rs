//! Recipe collaborators used by the graph builder
//!
//! The builder never loads or executes recipes itself. It asks a
//! [`RecipeSource`] where a recipe lives and a [`RecipeEvaluator`] what the
//! recipe declares for a given set of inputs.

pub mod index;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::dependency::package_type::DeclaredType;
use crate::dependency::requirement::RequirementSet;
use crate::reference::Reference;

pub use index::{RecipeDef, RecipeIndex};

/// Option name -> value
pub type OptionValues = BTreeMap<String, String>;

/// Package name -> options set on that package by a consumer
pub type DepOptions = BTreeMap<String, OptionValues>;

/// Setting name -> value
pub type Settings = BTreeMap<String, String>;

/// Everything an evaluation depends on
///
/// Evaluating the same recipe twice with equal inputs must produce equal
/// descriptors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipeInputs {
    /// Options assigned from downstream (or from a lockfile)
    pub options: OptionValues,
    /// Settings of the profile matching the node context
    pub settings: Settings,
}

/// Result of evaluating a recipe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecipeDescriptor {
    pub requirements: RequirementSet,
    /// Effective option values (defaults overlaid with the assigned inputs)
    pub options: OptionValues,
    /// Options this recipe sets on its dependencies
    pub dep_options: DepOptions,
    /// Settings the recipe reads
    pub settings: Settings,
    pub package_type: Option<DeclaredType>,
    pub display_name: String,
}

/// Where a recipe was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipeStatus {
    Downloaded,
    Cached,
    Editable,
    Missing,
    /// The root consumer recipe
    Consumer,
    /// A root made only of requirements, without recipe
    Virtual,
}

impl fmt::Display for RecipeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RecipeStatus::Downloaded => "Downloaded",
            RecipeStatus::Cached => "Cache",
            RecipeStatus::Editable => "Editable",
            RecipeStatus::Missing => "Missing",
            RecipeStatus::Consumer => "Consumer",
            RecipeStatus::Virtual => "Virtual",
        };
        f.write_str(s)
    }
}

/// Answer of [`RecipeSource::get_recipe`]
#[derive(Debug, Clone)]
pub struct RecipeLookup {
    pub location: Option<PathBuf>,
    pub status: RecipeStatus,
    /// Remote the recipe came from
    pub remote: Option<String>,
    /// Reference as stored, with its revision when known
    pub reference: Reference,
}

impl RecipeLookup {
    pub fn missing(reference: &Reference) -> Self {
        Self {
            location: None,
            status: RecipeStatus::Missing,
            remote: None,
            reference: reference.clone(),
        }
    }
}

/// Locates recipes in the cache or remotes
pub trait RecipeSource {
    /// Find the recipe for a concrete reference
    ///
    /// A recipe that does not exist is reported with [`RecipeStatus::Missing`],
    /// errors are reserved for failures of the source itself.
    fn get_recipe(&self, reference: &Reference, update: bool) -> Result<RecipeLookup>;

    /// All known references for a package, used to resolve version ranges
    fn search_references(
        &self,
        name: &str,
        user: Option<&str>,
        channel: Option<&str>,
    ) -> Result<Vec<Reference>>;
}

/// Evaluates recipes into descriptors
pub trait RecipeEvaluator {
    fn evaluate(&self, reference: &Reference, inputs: &RecipeInputs) -> Result<RecipeDescriptor>;

    /// Target of an alias recipe, `None` for regular recipes
    fn alias(&self, _reference: &Reference) -> Result<Option<Reference>> {
        Ok(None)
    }
}
