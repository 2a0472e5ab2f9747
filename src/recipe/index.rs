//! In-memory recipe index
//!
//! Serves as both [`RecipeSource`] and [`RecipeEvaluator`] for recipes
//! declared in a `deps.toml` file or built programmatically.
//!
//! ```
//! use ccgo_deps::dependency::Requirement;
//! use ccgo_deps::recipe::{RecipeDef, RecipeIndex};
//! use ccgo_deps::Reference;
//!
//! let mut index = RecipeIndex::new();
//! index
//!     .add(RecipeDef::new(Reference::parse("liba/1.0")?).option("shared", "False"))?;
//! index.add(
//!     RecipeDef::new(Reference::parse("libb/1.0")?)
//!         .require(Requirement::parse("liba/1.0")?),
//! )?;
//! assert_eq!(index.len(), 2);
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{bail, Result};

use super::{
    DepOptions, OptionValues, RecipeDescriptor, RecipeEvaluator, RecipeInputs, RecipeLookup,
    RecipeSource, RecipeStatus, Settings,
};
use crate::dependency::package_type::DeclaredType;
use crate::dependency::requirement::{Requirement, RequirementSet};
use crate::reference::Reference;

/// A requirement only declared when all `when` options match
#[derive(Debug, Clone)]
pub struct ConditionalRequirement {
    pub requirement: Requirement,
    pub when: OptionValues,
}

impl ConditionalRequirement {
    fn applies(&self, options: &OptionValues) -> bool {
        self.when
            .iter()
            .all(|(name, value)| options.get(name) == Some(value))
    }
}

/// Declarative recipe
#[derive(Debug, Clone)]
pub struct RecipeDef {
    pub reference: Reference,
    pub remote: Option<String>,
    pub editable: bool,
    pub package_type: Option<DeclaredType>,
    /// Makes this recipe an alias pointing to another reference
    pub alias: Option<Reference>,
    /// Declared options with their default values
    pub options: OptionValues,
    /// Names of the settings the recipe reads from the profile
    pub settings: Vec<String>,
    pub requires: Vec<ConditionalRequirement>,
    pub dep_options: DepOptions,
}

impl RecipeDef {
    pub fn new(reference: Reference) -> Self {
        Self {
            reference,
            remote: None,
            editable: false,
            package_type: None,
            alias: None,
            options: OptionValues::new(),
            settings: Vec::new(),
            requires: Vec::new(),
            dep_options: DepOptions::new(),
        }
    }

    pub fn require(self, requirement: Requirement) -> Self {
        self.require_when(requirement, &[])
    }

    pub fn require_when(mut self, requirement: Requirement, when: &[(&str, &str)]) -> Self {
        self.requires.push(ConditionalRequirement {
            requirement,
            when: when
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        self
    }

    pub fn option(mut self, name: &str, default: &str) -> Self {
        self.options.insert(name.to_string(), default.to_string());
        self
    }

    pub fn dep_option(mut self, package: &str, name: &str, value: &str) -> Self {
        self.dep_options
            .entry(package.to_string())
            .or_default()
            .insert(name.to_string(), value.to_string());
        self
    }

    pub fn package_type(mut self, package_type: DeclaredType) -> Self {
        self.package_type = Some(package_type);
        self
    }

    pub fn alias_of(mut self, target: Reference) -> Self {
        self.alias = Some(target);
        self
    }

    pub fn remote(mut self, remote: &str) -> Self {
        self.remote = Some(remote.to_string());
        self
    }

    pub fn editable(mut self) -> Self {
        self.editable = true;
        self
    }

    pub fn setting(mut self, name: &str) -> Self {
        self.settings.push(name.to_string());
        self
    }

    fn evaluate(&self, inputs: &RecipeInputs) -> Result<RecipeDescriptor> {
        let mut options = self.options.clone();
        for (name, value) in &inputs.options {
            if !options.contains_key(name) {
                let possible: Vec<&str> = self.options.keys().map(String::as_str).collect();
                bail!(
                    "option '{}' doesn't exist in '{}'. Possible options are [{}]",
                    name,
                    self.reference,
                    possible.join(", ")
                );
            }
            options.insert(name.clone(), value.clone());
        }

        let settings: Settings = self
            .settings
            .iter()
            .filter_map(|name| {
                inputs
                    .settings
                    .get(name)
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect();

        let mut requirements = RequirementSet::new();
        for conditional in self.requires.iter().filter(|c| c.applies(&options)) {
            requirements.add(conditional.requirement.clone())?;
        }

        Ok(RecipeDescriptor {
            requirements,
            options,
            dep_options: self.dep_options.clone(),
            settings,
            package_type: self.package_type,
            display_name: self.reference.to_string(),
        })
    }
}

/// Recipes kept in memory, looked up by reference
#[derive(Debug, Clone, Default)]
pub struct RecipeIndex {
    recipes: Vec<RecipeDef>,
}

impl RecipeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a recipe, rejecting a second recipe for the same reference
    pub fn add(&mut self, recipe: RecipeDef) -> Result<()> {
        if self.recipes.iter().any(|r| r.reference == recipe.reference) {
            bail!("Recipe '{}' is declared more than once", recipe.reference);
        }
        self.recipes.push(recipe);
        Ok(())
    }

    /// Recipe matching a reference; a pinned revision must match too
    pub fn find(&self, reference: &Reference) -> Option<&RecipeDef> {
        self.recipes.iter().find(|r| {
            r.reference == *reference && !r.reference.revision_conflicts(reference)
        })
    }

    pub fn recipes(&self) -> &[RecipeDef] {
        &self.recipes
    }

    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }
}

impl RecipeSource for RecipeIndex {
    fn get_recipe(&self, reference: &Reference, _update: bool) -> Result<RecipeLookup> {
        let Some(recipe) = self.find(reference) else {
            return Ok(RecipeLookup::missing(reference));
        };

        let status = if recipe.editable {
            RecipeStatus::Editable
        } else if recipe.remote.is_some() {
            RecipeStatus::Downloaded
        } else {
            RecipeStatus::Cached
        };

        Ok(RecipeLookup {
            location: None,
            status,
            remote: recipe.remote.clone(),
            reference: recipe.reference.clone(),
        })
    }

    fn search_references(
        &self,
        name: &str,
        user: Option<&str>,
        channel: Option<&str>,
    ) -> Result<Vec<Reference>> {
        Ok(self
            .recipes
            .iter()
            .map(|r| &r.reference)
            .filter(|r| {
                r.name == name && r.user.as_deref() == user && r.channel.as_deref() == channel
            })
            .cloned()
            .collect())
    }
}

impl RecipeEvaluator for RecipeIndex {
    fn evaluate(&self, reference: &Reference, inputs: &RecipeInputs) -> Result<RecipeDescriptor> {
        match self.find(reference) {
            Some(recipe) => recipe.evaluate(inputs),
            None => bail!("Recipe '{}' is not in the index", reference),
        }
    }

    fn alias(&self, reference: &Reference) -> Result<Option<Reference>> {
        Ok(self.find(reference).and_then(|r| r.alias.clone()))
    }
}
