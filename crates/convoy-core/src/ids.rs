//! Source and deployment identities.
//!
//! A `SourceLocation` names a source tree (repository plus directory
//! offset); adding a version makes a `SourceId`; adding a flavor makes a
//! `ManifestId`; adding a cluster makes a `DeploymentId`, the primary key
//! for deployment instances.

use std::fmt;

use semver::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Errors parsing identities and versions.
#[derive(Debug, Error)]
pub enum IdError {
    #[error("empty repository in source location")]
    EmptyRepo,

    #[error("unparseable version {0:?}: {1}")]
    BadVersion(String, semver::Error),

    #[error("malformed source identity {0:?}")]
    BadSourceId(String),
}

/// A source tree: a repository URL plus a directory offset within it.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    pub repo: String,
    #[serde(default)]
    pub dir: String,
}

impl SourceLocation {
    pub fn new(repo: impl Into<String>, dir: impl Into<String>) -> Self {
        Self {
            repo: repo.into(),
            dir: dir.into(),
        }
    }

    /// The last path segment of the repository URL.
    pub fn short_name(&self) -> Result<&str, IdError> {
        let name = self.repo.rsplit('/').next().unwrap_or("");
        if name.is_empty() {
            return Err(IdError::EmptyRepo);
        }
        Ok(name)
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dir.is_empty() {
            write!(f, "{}", self.repo)
        } else {
            write!(f, "{},{}", self.repo, self.dir)
        }
    }
}

/// Parse a version, tolerating an optional leading `v`.
pub fn parse_version(input: &str) -> Result<Version, IdError> {
    let trimmed = input.trim();
    let bare = trimmed.strip_prefix('v').unwrap_or(trimmed);
    Version::parse(bare).map_err(|e| IdError::BadVersion(input.to_string(), e))
}

/// Render a version without its build metadata.
///
/// Build metadata is ignored for equality, so this is the canonical form:
/// parsing it back yields an equal version.
pub fn format_version(v: &Version) -> String {
    let mut bare = v.clone();
    bare.build = semver::BuildMetadata::EMPTY;
    bare.to_string()
}

/// True when two versions agree on major.minor.patch.pre.
///
/// Build metadata never participates in equality.
pub fn versions_equal(a: &Version, b: &Version) -> bool {
    a.major == b.major && a.minor == b.minor && a.patch == b.patch && a.pre == b.pre
}

/// A versioned source tree — the identity of one buildable unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceId {
    #[serde(flatten)]
    pub location: SourceLocation,
    pub version: Version,
}

impl SourceId {
    pub fn new(location: SourceLocation, version: Version) -> Self {
        Self { location, version }
    }

    /// Parse the canonical `repo[,dir]@version` form.
    pub fn parse(input: &str) -> Result<Self, IdError> {
        let (loc, ver) = input
            .rsplit_once('@')
            .ok_or_else(|| IdError::BadSourceId(input.to_string()))?;
        let (repo, dir) = match loc.split_once(',') {
            Some((r, d)) => (r, d),
            None => (loc, ""),
        };
        if repo.is_empty() {
            return Err(IdError::EmptyRepo);
        }
        Ok(Self {
            location: SourceLocation::new(repo, dir),
            version: parse_version(ver)?,
        })
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.location, format_version(&self.version))
    }
}

impl PartialEq for SourceId {
    fn eq(&self, other: &Self) -> bool {
        self.location == other.location && versions_equal(&self.version, &other.version)
    }
}

impl Eq for SourceId {}

/// Identity of one manifest: a source location plus an opaque flavor label
/// allowing multiple manifests per source.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ManifestId {
    pub source: SourceLocation,
    #[serde(default)]
    pub flavor: String,
}

impl ManifestId {
    pub fn new(source: SourceLocation, flavor: impl Into<String>) -> Self {
        Self {
            source,
            flavor: flavor.into(),
        }
    }
}

impl fmt::Display for ManifestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.flavor.is_empty() {
            write!(f, "{}", self.source)
        } else {
            write!(f, "{}~{}", self.source, self.flavor)
        }
    }
}

/// Primary key for a deployment instance: one manifest in one cluster.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct DeploymentId {
    pub manifest_id: ManifestId,
    pub cluster: String,
}

impl DeploymentId {
    pub fn new(manifest_id: ManifestId, cluster: impl Into<String>) -> Self {
        Self {
            manifest_id,
            cluster: cluster.into(),
        }
    }

    /// Stable digest of this identity, used to derive external request IDs.
    ///
    /// 32 hex characters: the leading half of a SHA-256 over the identity
    /// fields, NUL-separated so field boundaries can't collide.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.manifest_id.source.repo.as_bytes());
        hasher.update([0]);
        hasher.update(self.manifest_id.source.dir.as_bytes());
        hasher.update([0]);
        hasher.update(self.manifest_id.flavor.as_bytes());
        hasher.update([0]);
        hasher.update(self.cluster.as_bytes());
        let full = hasher.finalize();
        let mut hex = String::with_capacity(32);
        for byte in &full[..16] {
            hex.push_str(&format!("{byte:02x}"));
        }
        hex
    }
}

impl fmt::Display for DeploymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.manifest_id, self.cluster)
    }
}
