//! Configuration management for ccgo-deps

pub mod deps_toml;
pub mod validation;

pub use deps_toml::{
    DepsConfig, ProfileConfig, ProfileSection, RecipeConfig, RequirementConfig,
    RequirementTable, ResolverConfig, RootConfig,
};
pub use validation::validate_config;
