//! The label convention that stamps source identity onto built images.
//!
//! The build pipeline writes these labels; the assembler and name cache
//! read them back to map an image name to the source that produced it.

use std::collections::BTreeMap;

use crate::artifact::RegistryError;
use crate::ids::{format_version, parse_version, SourceId, SourceLocation};

/// Repository URL of the source tree.
pub const LABEL_REPO: &str = "io.convoy.source.repo";

/// Directory offset within the repository.
pub const LABEL_DIR: &str = "io.convoy.source.dir";

/// Semantic version the image was built from.
pub const LABEL_VERSION: &str = "io.convoy.source.version";

/// Optional manifest flavor.
pub const LABEL_FLAVOR: &str = "io.convoy.source.flavor";

/// Labels the build pipeline attaches for a source identity.
pub fn labels_for(id: &SourceId, flavor: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(LABEL_REPO.to_string(), id.location.repo.clone());
    labels.insert(LABEL_DIR.to_string(), id.location.dir.clone());
    labels.insert(LABEL_VERSION.to_string(), format_version(&id.version));
    if !flavor.is_empty() {
        labels.insert(LABEL_FLAVOR.to_string(), flavor.to_string());
    }
    labels
}

/// Reverse-map image labels to the source identity that built the image.
pub fn source_id_from_labels(
    image: &str,
    labels: &BTreeMap<String, String>,
) -> Result<SourceId, RegistryError> {
    let missing = |label: &str| RegistryError::NoSourceIdFound {
        image: image.to_string(),
        reason: format!("label {label} missing"),
    };
    let repo = labels.get(LABEL_REPO).ok_or_else(|| missing(LABEL_REPO))?;
    if repo.is_empty() {
        return Err(missing(LABEL_REPO));
    }
    let dir = labels.get(LABEL_DIR).cloned().unwrap_or_default();
    let raw_version = labels
        .get(LABEL_VERSION)
        .ok_or_else(|| missing(LABEL_VERSION))?;
    let version = parse_version(raw_version).map_err(|e| RegistryError::NoSourceIdFound {
        image: image.to_string(),
        reason: e.to_string(),
    })?;
    Ok(SourceId::new(SourceLocation::new(repo.clone(), dir), version))
}

/// The flavor recorded on the image, if any.
pub fn flavor_from_labels(labels: &BTreeMap<String, String>) -> String {
    labels.get(LABEL_FLAVOR).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip() {
        let id = SourceId::new(
            SourceLocation::new("github.com/example/widget", "services/api"),
            parse_version("1.2.3-rc.1").unwrap(),
        );
        let labels = labels_for(&id, "debug");
        let back = source_id_from_labels("img", &labels).unwrap();
        assert_eq!(back, id);
        assert_eq!(flavor_from_labels(&labels), "debug");
    }

    #[test]
    fn missing_repo_label_is_no_source_id() {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_VERSION.to_string(), "1.0.0".to_string());
        let err = source_id_from_labels("img", &labels).unwrap_err();
        assert!(matches!(err, RegistryError::NoSourceIdFound { .. }));
    }

    #[test]
    fn bad_version_label_is_no_source_id() {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_REPO.to_string(), "github.com/x/y".to_string());
        labels.insert(LABEL_VERSION.to_string(), "not-semver".to_string());
        assert!(source_id_from_labels("img", &labels).is_err());
    }
}
