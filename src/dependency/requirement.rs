//! Requirements declared by recipes
//!
//! A [`Requirement`] describes one edge from a consumer to a dependency,
//! with the traits that decide how the dependency propagates further
//! downstream. A [`RequirementSet`] keeps the requirements of one recipe in
//! declaration order.

use std::fmt;

use anyhow::{bail, Result};
use tracing::warn;

use crate::dependency::package_type::PackageType;
use crate::reference::Reference;

/// Key used to index transitive requirements: the package name and whether
/// it is needed at build time
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequirementKey {
    pub name: String,
    pub build: bool,
}

/// Edge descriptor owned by a consumer node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    /// Target reference (may be a range until resolved)
    pub reference: Reference,

    /// Build-time tool requirement, executes on the build machine
    pub build: bool,

    /// Not exposed to the consumers of the consumer
    pub private: bool,

    /// Only needed for testing
    pub test: bool,

    /// Only forces a version on transitive dependents, creates no edge
    pub is_override: bool,

    /// Explicit visibility; defaults to `!private`
    pub visible: Option<bool>,

    /// Consumer needs the include directories
    pub headers: Option<bool>,

    /// Consumer links the libraries
    pub libs: Option<bool>,

    /// Consumer needs the runtime artifacts
    pub run: Option<bool>,

    pub transitive_headers: Option<bool>,
    pub transitive_libs: Option<bool>,

    /// Declared by the consumer itself, not propagated from upstream
    pub direct: bool,

    /// Lockfile node this requirement was pinned to
    pub locked_id: Option<String>,
}

impl Requirement {
    /// Create a regular (host, public, direct) requirement
    pub fn new(reference: Reference) -> Self {
        Self {
            reference,
            build: false,
            private: false,
            test: false,
            is_override: false,
            visible: None,
            headers: None,
            libs: None,
            run: None,
            transitive_headers: None,
            transitive_libs: None,
            direct: true,
            locked_id: None,
        }
    }

    /// Parse the reference and create a regular requirement
    pub fn parse(reference: &str) -> Result<Self> {
        Ok(Self::new(Reference::parse(reference)?))
    }

    pub fn as_build(mut self) -> Self {
        self.build = true;
        self
    }

    pub fn as_private(mut self) -> Self {
        self.private = true;
        self
    }

    pub fn as_test(mut self) -> Self {
        self.test = true;
        self
    }

    pub fn as_override(mut self) -> Self {
        self.is_override = true;
        self
    }

    pub fn with_visible(mut self, visible: bool) -> Self {
        self.visible = Some(visible);
        self
    }

    pub fn with_headers(mut self, headers: bool) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_libs(mut self, libs: bool) -> Self {
        self.libs = Some(libs);
        self
    }

    pub fn with_run(mut self, run: bool) -> Self {
        self.run = Some(run);
        self
    }

    pub fn with_transitive_headers(mut self, value: bool) -> Self {
        self.transitive_headers = Some(value);
        self
    }

    pub fn with_transitive_libs(mut self, value: bool) -> Self {
        self.transitive_libs = Some(value);
        self
    }

    pub fn name(&self) -> &str {
        &self.reference.name
    }

    pub fn key(&self) -> RequirementKey {
        RequirementKey {
            name: self.reference.name.clone(),
            build: self.build,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible.unwrap_or(!self.private)
    }

    pub fn includes_headers(&self) -> bool {
        self.headers.unwrap_or(true)
    }

    pub fn links(&self) -> bool {
        self.libs.unwrap_or(true)
    }

    pub fn runs(&self) -> bool {
        self.run.unwrap_or(false)
    }

    /// Pin this requirement to a lockfile entry
    pub fn lock(&mut self, reference: Reference, locked_id: impl Into<String>) {
        self.reference = reference;
        self.locked_id = Some(locked_id.into());
    }

    /// Fill the traits the recipe left unset from the package types
    ///
    /// `consumer` is the type of the node declaring this requirement and
    /// `dependency` the type of the node it points to.
    pub fn process_package_type(&mut self, consumer: PackageType, dependency: PackageType) {
        fn set_if_none(field: &mut Option<bool>, value: bool) {
            if field.is_none() {
                *field = Some(value);
            }
        }

        match dependency {
            PackageType::Application => {
                set_if_none(&mut self.headers, false);
                set_if_none(&mut self.libs, false);
                set_if_none(&mut self.run, true);
            }
            PackageType::Shared => set_if_none(&mut self.run, true),
            PackageType::Static => set_if_none(&mut self.run, false),
            PackageType::HeaderOnly => {
                set_if_none(&mut self.run, false);
                set_if_none(&mut self.libs, false);
                set_if_none(&mut self.headers, true);
            }
            PackageType::Unknown => {}
        }

        if consumer == PackageType::HeaderOnly {
            set_if_none(&mut self.transitive_headers, true);
            set_if_none(&mut self.transitive_libs, true);
        }
    }

    /// Merge the traits of an existing requirement for the same key
    /// reaching the same node
    pub fn aggregate(&mut self, other: &Requirement) {
        debug_assert_eq!(self.build, other.build);

        fn or(a: Option<bool>, b: Option<bool>) -> Option<bool> {
            match (a, b) {
                (None, None) => None,
                (a, b) => Some(a.unwrap_or(false) || b.unwrap_or(false)),
            }
        }

        self.headers = or(self.headers, other.headers);
        self.libs = or(self.libs, other.libs);
        self.run = or(self.run, other.run);
        self.visible = Some(self.is_visible() || other.is_visible());
        self.transitive_headers = self.transitive_headers.or(other.transitive_headers);
        self.transitive_libs = self.transitive_libs.or(other.transitive_libs);
        self.direct |= other.direct;
        self.test &= other.test;
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference)?;
        let mut flags = Vec::new();
        if self.build {
            flags.push("build");
        }
        if self.private {
            flags.push("private");
        }
        if self.test {
            flags.push("test");
        }
        if self.is_override {
            flags.push("override");
        }
        if !flags.is_empty() {
            write!(f, " ({})", flags.join(", "))?;
        }
        Ok(())
    }
}

/// Ordered requirements of a single recipe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequirementSet {
    requirements: Vec<Requirement>,
}

impl RequirementSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a requirement, rejecting a second one for the same name and context
    pub fn add(&mut self, requirement: Requirement) -> Result<()> {
        if let Some(existing) = self.get_key(&requirement.key()) {
            bail!(
                "Duplicated requirement '{}', already required as '{}'",
                requirement.reference,
                existing.reference
            );
        }
        self.requirements.push(requirement);
        Ok(())
    }

    /// Insert or replace the requirement with the same key, keeping its position
    pub fn set(&mut self, requirement: Requirement) {
        let key = requirement.key();
        match self.requirements.iter_mut().find(|r| r.key() == key) {
            Some(slot) => *slot = requirement,
            None => self.requirements.push(requirement),
        }
    }

    /// Host-context requirement by package name
    pub fn get(&self, name: &str) -> Option<&Requirement> {
        self.requirements
            .iter()
            .find(|r| !r.build && r.reference.name == name)
    }

    pub fn get_key(&self, key: &RequirementKey) -> Option<&Requirement> {
        self.requirements.iter().find(|r| r.key() == *key)
    }

    pub fn remove(&mut self, name: &str) -> Option<Requirement> {
        let pos = self
            .requirements
            .iter()
            .position(|r| !r.build && r.reference.name == name)?;
        Some(self.requirements.remove(pos))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Requirement> {
        self.requirements.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Requirement> {
        self.requirements.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }

    /// Replace references with the ones imposed from downstream
    ///
    /// Private, build and lockfile-pinned requirements are never overridden.
    /// Returns the `(declared, forced)` reference pairs that were replaced.
    pub fn apply_overrides(
        &mut self,
        down_reqs: &RequirementSet,
        own_ref: Option<&Reference>,
        down_ref: Option<&str>,
    ) -> Vec<(Reference, Reference)> {
        let mut replaced = Vec::new();
        for req in self.requirements.iter_mut() {
            if req.private || req.build || req.locked_id.is_some() {
                continue;
            }
            let Some(other) = down_reqs.get(req.name()) else {
                continue;
            };
            if other.reference != req.reference
                || req.reference.revision_conflicts(&other.reference)
            {
                warn!(
                    "{}: requirement {} overridden by {} to {}",
                    own_ref.map(ToString::to_string).unwrap_or_default(),
                    req.reference,
                    down_ref.unwrap_or("your root package"),
                    other.reference
                );
                replaced.push((req.reference.clone(), other.reference.clone()));
                req.reference = other.reference.clone();
            }
        }
        replaced
    }

    /// Requirements to pass upstream when expanding this node's dependencies
    ///
    /// Starts from the downstream set (minus the node itself) and sets every
    /// non-private host requirement, overrides included.
    pub fn upstream(&self, down_reqs: &RequirementSet, own_name: Option<&str>) -> RequirementSet {
        let mut new_reqs = down_reqs.clone();
        if let Some(name) = own_name {
            new_reqs.remove(name);
        }
        for req in &self.requirements {
            if req.private || req.build {
                continue;
            }
            new_reqs.set(req.clone());
        }
        new_reqs
    }
}

impl<'a> IntoIterator for &'a RequirementSet {
    type Item = &'a Requirement;
    type IntoIter = std::slice::Iter<'a, Requirement>;

    fn into_iter(self) -> Self::IntoIter {
        self.requirements.iter()
    }
}

impl FromIterator<Requirement> for RequirementSet {
    fn from_iter<T: IntoIterator<Item = Requirement>>(iter: T) -> Self {
        let mut set = RequirementSet::new();
        for req in iter {
            set.set(req);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(s: &str) -> Requirement {
        Requirement::parse(s).unwrap()
    }

    #[test]
    fn test_duplicate_requirement_rejected() {
        let mut set = RequirementSet::new();
        set.add(req("liba/1.0")).unwrap();
        assert!(set.add(req("liba/2.0")).is_err());
        // Same name as a build requirement is a different key
        set.add(req("liba/2.0").as_build()).unwrap();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_set_preserves_declaration_order() {
        let mut set = RequirementSet::new();
        set.add(req("liba/1.0")).unwrap();
        set.add(req("libb/1.0")).unwrap();
        set.set(req("liba/1.1"));

        let names: Vec<_> = set.iter().map(|r| r.reference.to_string()).collect();
        assert_eq!(names, vec!["liba/1.1", "libb/1.0"]);
    }

    #[test]
    fn test_apply_overrides() {
        let mut own = RequirementSet::new();
        own.add(req("liba/1.0")).unwrap();
        own.add(req("libz/1.0").as_private()).unwrap();

        let mut down = RequirementSet::new();
        down.add(req("liba/2.0")).unwrap();
        down.add(req("libz/2.0")).unwrap();

        let replaced = own.apply_overrides(&down, None, Some("app/1.0"));
        assert_eq!(replaced.len(), 1);
        assert_eq!(own.get("liba").unwrap().reference.version, "2.0");
        // private requirements keep their own version
        assert_eq!(own.get("libz").unwrap().reference.version, "1.0");
    }

    #[test]
    fn test_locked_requirement_not_overridden() {
        let mut own = RequirementSet::new();
        let mut locked = req("liba/1.0");
        locked.lock(Reference::parse("liba/1.0").unwrap(), "3");
        own.add(locked).unwrap();

        let mut down = RequirementSet::new();
        down.add(req("liba/2.0")).unwrap();

        own.apply_overrides(&down, None, None);
        assert_eq!(own.get("liba").unwrap().reference.version, "1.0");
    }

    #[test]
    fn test_upstream_skips_private_and_own_name() {
        let mut own = RequirementSet::new();
        own.add(req("liba/1.0")).unwrap();
        own.add(req("libp/1.0").as_private()).unwrap();
        own.add(req("cmake/3.20").as_build()).unwrap();
        own.add(req("zlib/1.3").as_override()).unwrap();

        let mut down = RequirementSet::new();
        down.add(req("libb/1.0")).unwrap();
        down.add(req("self/1.0")).unwrap();

        let up = own.upstream(&down, Some("self"));
        let names: Vec<_> = up.iter().map(|r| r.name().to_string()).collect();
        assert_eq!(names, vec!["libb", "liba", "zlib"]);
    }

    #[test]
    fn test_process_package_type_defaults() {
        let mut r = req("tool/1.0");
        r.process_package_type(PackageType::Static, PackageType::Application);
        assert_eq!(r.headers, Some(false));
        assert_eq!(r.libs, Some(false));
        assert_eq!(r.run, Some(true));

        let mut r = req("hdr/1.0").with_headers(false);
        r.process_package_type(PackageType::HeaderOnly, PackageType::HeaderOnly);
        assert_eq!(r.headers, Some(false), "explicit values are kept");
        assert_eq!(r.libs, Some(false));
        assert_eq!(r.transitive_headers, Some(true));
    }

    #[test]
    fn test_aggregate_merges_traits() {
        let mut a = req("liba/1.0").with_headers(false).with_libs(true).as_test();
        let b = req("liba/1.0").with_headers(true).with_run(true);
        a.aggregate(&b);
        assert_eq!(a.headers, Some(true));
        assert_eq!(a.libs, Some(true));
        assert_eq!(a.run, Some(true));
        assert!(!a.test, "required by a non-test path too");
    }
}
