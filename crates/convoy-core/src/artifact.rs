//! Built artifacts and the registry interface that resolves them.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ids::SourceId;

/// Quality kind that participates in the advisory gate.
pub const QUALITY_KIND_ADVISORY: &str = "advisory";

/// A named attribute attached to a built artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quality {
    pub name: String,
    pub kind: String,
}

impl Quality {
    pub fn advisory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: QUALITY_KIND_ADVISORY.to_string(),
        }
    }

    pub fn is_advisory(&self) -> bool {
        self.kind == QUALITY_KIND_ADVISORY && !self.name.is_empty()
    }
}

/// A deployable container image plus its qualities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildArtifact {
    /// Fully qualified image name.
    pub name: String,
    #[serde(default)]
    pub qualities: Vec<Quality>,
}

/// Errors from artifact and label lookups.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryError {
    /// No image is known for the requested source identity.
    #[error("no image name found for {source_id}")]
    NoImageNameFound { source_id: String },

    /// An image's labels don't encode a source identity.
    #[error("no source identity found for image {image}: {reason}")]
    NoSourceIdFound { image: String, reason: String },

    /// The backing registry or cache failed.
    #[error("registry backend: {message}")]
    Backend { message: String },
}

/// Resolves source identities to build artifacts and image names to the
/// labels their build stamped on them.
#[async_trait]
pub trait ArtifactRegistry: Send + Sync {
    /// The artifact built for this exact source identity.
    async fn get_artifact(&self, id: &SourceId) -> Result<BuildArtifact, RegistryError>;

    /// Labels attached to an image, including the source-identity
    /// convention labels.
    async fn image_labels(
        &self,
        image: &str,
    ) -> Result<BTreeMap<String, String>, RegistryError>;
}
