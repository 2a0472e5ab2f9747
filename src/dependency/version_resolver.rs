//! Version range resolution using semantic versioning
//!
//! A requirement like `zlib/[>=1.2 <2.0]` is resolved against the references
//! the recipe source knows for `zlib`, picking the highest matching version.
//!
//! Range expressions:
//! - space separated comparators must all match: `>=1.2 <2.0`
//! - `||` separates alternatives: `~1.2 || ^2.0`
//! - a bare version is exact when complete (`1.2.3`) and a wildcard
//!   otherwise (`1.2` matches `1.2.x`); `*` or an empty range matches anything
//! - options follow a comma: `>=1.0, include_prerelease=True`

use std::collections::HashMap;
use std::fmt;

use anyhow::{bail, Context, Result};
use semver::{Prerelease, Version, VersionReq};
use tracing::{debug, info};

use crate::dependency::requirement::Requirement;
use crate::error::GraphError;
use crate::recipe::RecipeSource;
use crate::reference::Reference;

/// One alternative of a range expression
#[derive(Debug, Clone)]
pub enum VersionRequirement {
    /// Exact version (e.g., "1.2.3")
    Exact(Version),
    /// Version range (e.g., "^1.2", "~1.2.3", ">=1.0, <2.0")
    Range(VersionReq),
    /// Any version (e.g., "*" or empty)
    Any,
}

impl VersionRequirement {
    /// Parse space separated comparators
    pub fn parse(version_str: &str) -> Result<Self> {
        let version_str = version_str.trim();

        if version_str.is_empty() || version_str == "*" {
            return Ok(Self::Any);
        }

        let comparators = join_operators(version_str);
        if comparators.len() == 1 {
            let single = comparators[0].as_str();
            if single.chars().next().is_some_and(|c| c.is_ascii_digit()) {
                if let Ok(version) = Version::parse(single) {
                    return Ok(Self::Exact(version));
                }
                // Partial version, "1.2" means "1.2.*"
                let wildcard = format!("{}.*", single);
                let req = VersionReq::parse(&wildcard)
                    .with_context(|| format!("Failed to parse version '{}'", single))?;
                return Ok(Self::Range(req));
            }
        }

        let joined = comparators.join(", ");
        let req = VersionReq::parse(&joined)
            .with_context(|| format!("Failed to parse version requirement '{}'", version_str))?;

        Ok(Self::Range(req))
    }

    /// Check if this requirement is satisfied by the given version
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Self::Exact(v) => v == version,
            Self::Range(req) => req.matches(version),
            Self::Any => version.pre.is_empty(),
        }
    }
}

impl fmt::Display for VersionRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(v) => write!(f, "={}", v),
            Self::Range(req) => write!(f, "{}", req),
            Self::Any => write!(f, "*"),
        }
    }
}

/// Glue a lone operator to the version following it: `>= 1.0` -> `>=1.0`
fn join_operators(expression: &str) -> Vec<String> {
    let mut result: Vec<String> = Vec::new();
    let mut pending = String::new();
    for token in expression.split_whitespace() {
        if token.chars().all(|c| "<>=~^".contains(c)) {
            pending.push_str(token);
            continue;
        }
        result.push(format!("{}{}", pending, token));
        pending.clear();
    }
    if !pending.is_empty() {
        result.push(pending);
    }
    result
}

/// Parsed range expression
#[derive(Debug, Clone)]
pub struct VersionRange {
    pub alternatives: Vec<VersionRequirement>,
    pub include_prerelease: bool,
}

impl VersionRange {
    pub fn parse(expression: &str) -> Result<Self> {
        let mut parts = expression.split(',');
        let body = parts.next().unwrap_or_default();

        let mut include_prerelease = false;
        for option in parts {
            let option = option.trim();
            match option.split_once('=') {
                Some(("include_prerelease", value)) => {
                    include_prerelease = value.trim().eq_ignore_ascii_case("true");
                }
                _ => bail!("Unknown version range option '{}'", option),
            }
        }

        let alternatives = body
            .split("||")
            .map(VersionRequirement::parse)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            alternatives,
            include_prerelease,
        })
    }

    pub fn contains(&self, version: &Version) -> bool {
        if self.alternatives.iter().any(|alt| alt.matches(version)) {
            return true;
        }
        if self.include_prerelease && !version.pre.is_empty() {
            let mut release = version.clone();
            release.pre = Prerelease::EMPTY;
            return self.alternatives.iter().any(|alt| alt.matches(&release));
        }
        false
    }
}

/// Parse a version, padding missing components: "1.0" -> "1.0.0"
pub fn parse_version_loose(version: &str) -> Option<Version> {
    if let Ok(v) = Version::parse(version) {
        return Some(v);
    }
    let (core, rest) = match version.find(|c| c == '-' || c == '+') {
        Some(pos) => version.split_at(pos),
        None => (version, ""),
    };
    let components = core.split('.').count();
    let padded = match components {
        1 => format!("{}.0.0{}", core, rest),
        2 => format!("{}.0{}", core, rest),
        _ => return None,
    };
    Version::parse(&padded).ok()
}

/// Resolves version ranges against the references known to a recipe source
#[derive(Debug, Default)]
pub struct VersionRangeResolver {
    /// Range reference -> resolved reference
    cache: HashMap<Reference, Reference>,
}

impl VersionRangeResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the range of `require` with the highest matching reference
    ///
    /// Requirements without a range are left untouched.
    pub fn resolve(
        &mut self,
        require: &mut Requirement,
        consumer: &str,
        source: &dyn RecipeSource,
    ) -> Result<(), GraphError> {
        let Some(expression) = require.reference.range_expression().map(str::to_string) else {
            return Ok(());
        };
        let original = require.reference.clone();

        if let Some(resolved) = self.cache.get(&original) {
            debug!("Version range '{}' cached as '{}'", original, resolved);
            require.reference = resolved.clone();
            return Ok(());
        }

        let range = VersionRange::parse(&expression)
            .map_err(|e| GraphError::recipe(&original, e))?;
        let candidates = source
            .search_references(
                &original.name,
                original.user.as_deref(),
                original.channel.as_deref(),
            )
            .map_err(|e| GraphError::recipe(&original, e))?;

        let Some(resolved) = Self::best_match(&range, candidates) else {
            return Err(GraphError::RangeResolution {
                range: expression,
                requirement: original.to_string(),
                consumer: consumer.to_string(),
            });
        };

        info!(
            "Version range '{}' required by '{}' resolved to '{}'",
            expression, consumer, resolved
        );
        self.cache.insert(original, resolved.clone());
        require.reference = resolved;
        Ok(())
    }

    fn best_match(range: &VersionRange, candidates: Vec<Reference>) -> Option<Reference> {
        candidates
            .into_iter()
            .filter(|r| !r.is_range())
            .filter_map(|r| parse_version_loose(&r.version).map(|v| (v, r)))
            .filter(|(v, _)| range.contains(v))
            .max_by(|(a, _), (b, _)| a.cmp(b))
            .map(|(_, r)| r)
    }
}
