//! Package type classification
//!
//! The package type decides how requirement traits propagate through a node
//! (see [`crate::dependency::propagation`]).

use std::fmt;
use std::str::FromStr;

use anyhow::bail;
use serde::{Deserialize, Serialize};

use crate::recipe::OptionValues;

/// Classification of a built artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PackageType {
    /// Shared/dynamic library
    #[serde(rename = "shared-library")]
    Shared,
    /// Static library
    #[serde(rename = "static-library")]
    Static,
    /// Header-only library
    #[serde(rename = "header-library")]
    HeaderOnly,
    /// Executables only, nothing to link
    Application,
    /// Could not be classified
    Unknown,
}

/// Package type as declared by a recipe, before options are known
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeclaredType {
    /// Shared or static, decided by the `shared` option
    Library,
    #[serde(rename = "shared-library")]
    Shared,
    #[serde(rename = "static-library")]
    Static,
    #[serde(rename = "header-library")]
    HeaderOnly,
    Application,
    Unknown,
}

impl PackageType {
    /// Classify a package from its declared type and effective options
    pub fn deduce(declared: Option<DeclaredType>, options: &OptionValues) -> Self {
        let shared = || match options.get("shared") {
            Some(value) if is_true(value) => PackageType::Shared,
            _ => PackageType::Static,
        };

        match declared {
            Some(DeclaredType::Library) => shared(),
            Some(DeclaredType::Shared) => PackageType::Shared,
            Some(DeclaredType::Static) => PackageType::Static,
            Some(DeclaredType::HeaderOnly) => PackageType::HeaderOnly,
            Some(DeclaredType::Application) => PackageType::Application,
            Some(DeclaredType::Unknown) => PackageType::Unknown,
            None => {
                if options.get("header_only").is_some_and(|v| is_true(v)) {
                    PackageType::HeaderOnly
                } else if options.contains_key("shared") {
                    shared()
                } else {
                    PackageType::Unknown
                }
            }
        }
    }

    /// Libraries with runtime artifacts (shared libs, executables)
    pub fn is_runtime(self) -> bool {
        matches!(self, PackageType::Shared | PackageType::Application)
    }
}

fn is_true(value: &str) -> bool {
    matches!(value, "True" | "true" | "1" | "yes" | "ON" | "on")
}

impl fmt::Display for PackageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PackageType::Shared => "shared-library",
            PackageType::Static => "static-library",
            PackageType::HeaderOnly => "header-library",
            PackageType::Application => "application",
            PackageType::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl FromStr for DeclaredType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        Ok(match s {
            "library" => DeclaredType::Library,
            "shared-library" => DeclaredType::Shared,
            "static-library" => DeclaredType::Static,
            "header-library" => DeclaredType::HeaderOnly,
            "application" => DeclaredType::Application,
            "unknown" => DeclaredType::Unknown,
            other => bail!(
                "Unknown package type '{}'. Expected one of: library, shared-library, \
                 static-library, header-library, application, unknown",
                other
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(pairs: &[(&str, &str)]) -> OptionValues {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_library_follows_shared_option() {
        let declared = Some(DeclaredType::Library);
        assert_eq!(
            PackageType::deduce(declared, &opts(&[("shared", "True")])),
            PackageType::Shared
        );
        assert_eq!(
            PackageType::deduce(declared, &opts(&[("shared", "False")])),
            PackageType::Static
        );
        assert_eq!(PackageType::deduce(declared, &opts(&[])), PackageType::Static);
    }

    #[test]
    fn test_undeclared_type_from_options() {
        assert_eq!(
            PackageType::deduce(None, &opts(&[("header_only", "True")])),
            PackageType::HeaderOnly
        );
        assert_eq!(
            PackageType::deduce(None, &opts(&[("shared", "True")])),
            PackageType::Shared
        );
        assert_eq!(PackageType::deduce(None, &opts(&[])), PackageType::Unknown);
    }

    #[test]
    fn test_parse_declared_type() {
        assert_eq!(
            "header-library".parse::<DeclaredType>().unwrap(),
            DeclaredType::HeaderOnly
        );
        assert!("plugin".parse::<DeclaredType>().is_err());
    }
}
