//! Package references
//!
//! A reference identifies a recipe: `name/version[@user/channel][#revision]`.
//! The version may be a bracketed range (`zlib/[>=1.2 <2]`) until the
//! version range resolver replaces it with a concrete version.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

/// Immutable recipe identifier
///
/// Equality, hashing and ordering ignore the revision. Use
/// [`Reference::revision_conflicts`] to compare pinned revisions.
#[derive(Debug, Clone)]
pub struct Reference {
    pub name: String,
    pub version: String,
    pub user: Option<String>,
    pub channel: Option<String>,
    pub revision: Option<String>,
}

impl Reference {
    /// Create a reference without user/channel or revision
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            user: None,
            channel: None,
            revision: None,
        }
    }

    /// Parse a reference string like "zlib/1.2.13@corp/stable#rev1"
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();

        let (body, revision) = match input.split_once('#') {
            Some((body, rev)) => {
                if rev.is_empty() {
                    bail!("Invalid reference '{}': empty revision after '#'", input);
                }
                (body, Some(rev.to_string()))
            }
            None => (input, None),
        };

        let (name_version, user_channel) = match body.split_once('@') {
            Some((nv, uc)) => (nv, Some(uc)),
            None => (body, None),
        };

        let Some((name, version)) = name_version.split_once('/') else {
            bail!(
                "Invalid reference '{}': expected 'name/version[@user/channel][#revision]'",
                input
            );
        };
        if name.is_empty() || version.is_empty() {
            bail!("Invalid reference '{}': name and version are required", input);
        }
        if version.starts_with('[') != version.ends_with(']') {
            bail!("Invalid reference '{}': unbalanced version range brackets", input);
        }

        let (user, channel) = match user_channel {
            Some(uc) => match uc.split_once('/') {
                Some((user, channel)) if !user.is_empty() && !channel.is_empty() => {
                    (Some(user.to_string()), Some(channel.to_string()))
                }
                _ => bail!("Invalid reference '{}': expected '@user/channel'", input),
            },
            None => (None, None),
        };

        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
            user,
            channel,
            revision,
        })
    }

    /// Whether the version is an unresolved range expression
    pub fn is_range(&self) -> bool {
        self.version.starts_with('[') && self.version.ends_with(']')
    }

    /// The range expression without brackets, if this is a range
    pub fn range_expression(&self) -> Option<&str> {
        if self.is_range() {
            Some(self.version[1..self.version.len() - 1].trim())
        } else {
            None
        }
    }

    /// Same reference with a different version
    pub fn with_version(&self, version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            revision: None,
            ..self.clone()
        }
    }

    /// Same reference with the given revision pinned
    pub fn with_revision(&self, revision: impl Into<String>) -> Self {
        Self {
            revision: Some(revision.into()),
            ..self.clone()
        }
    }

    /// Same reference without revision
    pub fn without_revision(&self) -> Self {
        Self {
            revision: None,
            ..self.clone()
        }
    }

    /// True only when both references pin a revision and the revisions differ
    pub fn revision_conflicts(&self, other: &Reference) -> bool {
        matches!(
            (&self.revision, &other.revision),
            (Some(a), Some(b)) if a != b
        )
    }

    /// Same name, user and channel
    pub fn same_package(&self, other: &Reference) -> bool {
        self.name == other.name && self.user == other.user && self.channel == other.channel
    }

    /// Full text form including the revision
    pub fn full_str(&self) -> String {
        match &self.revision {
            Some(rev) => format!("{}#{}", self, rev),
            None => self.to_string(),
        }
    }

    fn key(&self) -> (&str, &str, Option<&str>, Option<&str>) {
        (
            &self.name,
            &self.version,
            self.user.as_deref(),
            self.channel.as_deref(),
        )
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Reference {}

impl Hash for Reference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl PartialOrd for Reference {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Reference {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)?;
        if let (Some(user), Some(channel)) = (&self.user, &self.channel) {
            write!(f, "@{}/{}", user, channel)?;
        }
        Ok(())
    }
}

impl FromStr for Reference {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for Reference {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.full_str())
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Reference::parse(&s).map_err(de::Error::custom)
    }
}
