//! Core deployment model for the convoy control plane.
//!
//! Value types for deployments and their identities, the pairwise diff
//! engine, the artifact registry interface, the name resolver, and the
//! resolution taxonomy every downstream component reports in.

pub mod artifact;
pub mod config;
pub mod deploy_state;
pub mod deployment;
pub mod diff;
pub mod ids;
pub mod labels;
pub mod resolution;
pub mod resolver;

pub use artifact::{ArtifactRegistry, BuildArtifact, Quality, RegistryError};
pub use config::{DeployConfig, Env, Flaw, Metadata, Resources, Startup, Volume, VolumeMode};
pub use deploy_state::{DeployState, DeployStatus, ExecutorData};
pub use deployment::{Cluster, Clusters, Deployment, DeploymentKind, OwnerSet};
pub use diff::{Deployable, DeployablePair, DeployStates, Deployments, DiffSet, PairKind};
pub use ids::{
    format_version, parse_version, versions_equal, DeploymentId, IdError, ManifestId,
    SourceId, SourceLocation,
};
pub use labels::{flavor_from_labels, labels_for, source_id_from_labels};
pub use resolution::{DiffResolution, ResolutionType, ResolveError};
pub use resolver::resolve_pair;

/// The identity of a user making changes, recorded on state writes.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct User {
    pub name: String,
    #[serde(default)]
    pub email: String,
}

impl std::fmt::Display for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.email.is_empty() {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} <{}>", self.name, self.email)
        }
    }
}
