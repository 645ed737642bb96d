//! Slug validation and `slug@version` card references.

use std::fmt;

use crate::error::TypeError;
use crate::version::Version;

/// Upper bound on slug length unless configured otherwise.
pub const DEFAULT_MAX_SLUG_LENGTH: usize = 255;

/// Validate a slug: non-empty, bounded, lowercase alphanumerics and `-`.
pub fn validate_slug(slug: &str, max_length: usize) -> Result<(), TypeError> {
    let fail = |reason: &str| TypeError::InvalidSlug {
        slug: slug.to_string(),
        reason: reason.to_string(),
    };
    if slug.is_empty() {
        return Err(fail("slug is empty"));
    }
    if slug.len() > max_length {
        return Err(fail(&format!("slug exceeds {max_length} characters")));
    }
    if !slug
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(fail("slug may only contain a-z, 0-9 and '-'"));
    }
    Ok(())
}

/// Which version of a slug a reference points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VersionSelector {
    /// The highest version sharing the slug.
    Latest,
    /// One exact version string.
    Exact(String),
}

/// A parsed `slug@version`, `slug@latest` or bare `slug` reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CardRef {
    pub slug: String,
    pub version: VersionSelector,
}

impl CardRef {
    pub fn parse(reference: &str) -> Result<Self, TypeError> {
        let (slug, version) = match reference.split_once('@') {
            None => (reference, VersionSelector::Latest),
            Some((slug, "latest")) => (slug, VersionSelector::Latest),
            Some((slug, version)) => {
                Version::parse(version)
                    .map_err(|_| TypeError::InvalidReference(reference.to_string()))?;
                (slug, VersionSelector::Exact(version.to_string()))
            }
        };
        if slug.is_empty() || slug.contains('@') {
            return Err(TypeError::InvalidReference(reference.to_string()));
        }
        Ok(Self {
            slug: slug.to_string(),
            version,
        })
    }

    pub fn exact(slug: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            version: VersionSelector::Exact(version.into()),
        }
    }

    pub fn latest(slug: impl Into<String>) -> Self {
        Self {
            slug: slug.into(),
            version: VersionSelector::Latest,
        }
    }

    /// The exact version, if one was given.
    pub fn exact_version(&self) -> Option<&str> {
        match &self.version {
            VersionSelector::Exact(v) => Some(v),
            VersionSelector::Latest => None,
        }
    }
}

impl fmt::Display for CardRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            VersionSelector::Latest => write!(f, "{}@latest", self.slug),
            VersionSelector::Exact(v) => write!(f, "{}@{v}", self.slug),
        }
    }
}
