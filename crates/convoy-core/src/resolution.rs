//! Terminal records of how each diff pair was rectified, and the error
//! taxonomy they carry.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::artifact::RegistryError;
use crate::deployment::Deployment;
use crate::ids::{DeploymentId, SourceId};

/// How a single pair's rectification ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionType {
    #[serde(rename = "created")]
    Created,
    #[serde(rename = "updated")]
    Updated,
    #[serde(rename = "deleted")]
    Deleted,
    #[serde(rename = "unchanged")]
    Unchanged,
    #[serde(rename = "not created")]
    NotCreated,
    #[serde(rename = "not updated")]
    NotUpdated,
    #[serde(rename = "not deleted")]
    NotDeleted,
}

impl ResolutionType {
    /// Whether this description marks a finished create/update, the two
    /// outcomes a deploy poller waits for.
    pub fn is_finished(&self) -> bool {
        matches!(self, ResolutionType::Created | ResolutionType::Updated)
    }
}

impl fmt::Display for ResolutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResolutionType::Created => "created",
            ResolutionType::Updated => "updated",
            ResolutionType::Deleted => "deleted",
            ResolutionType::Unchanged => "unchanged",
            ResolutionType::NotCreated => "not created",
            ResolutionType::NotUpdated => "not updated",
            ResolutionType::NotDeleted => "not deleted",
        };
        write!(f, "{name}")
    }
}

/// Why a pair could not be (fully) rectified.
///
/// Create/change/delete failures carry deep-cloned deployment snapshots
/// for postmortem; transport failures carry the downstream status.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResolveError {
    #[error("no artifact for {source_id}: {source}")]
    MissingImageName {
        source_id: String,
        #[source]
        source: RegistryError,
    },

    #[error("artifact for {source_id} carries unacceptable advisory {advisory:?}")]
    UnacceptableAdvisory { advisory: String, source_id: String },

    #[error("deployment status is failed")]
    FailedStatus,

    #[error("create of {} failed: {message}", deployment.cluster_name)]
    Create {
        deployment: Box<Deployment>,
        message: String,
    },

    #[error("change of {} failed: {message}", post.cluster_name)]
    Change {
        prior: Box<Deployment>,
        post: Box<Deployment>,
        message: String,
    },

    #[error("delete of {} failed: {message}", deployment.cluster_name)]
    Delete {
        deployment: Box<Deployment>,
        message: String,
    },

    #[error("scheduler returned {status}: {message}")]
    Transport { status: u16, message: String },

    #[error("{message}")]
    Other { message: String },
}

impl ResolveError {
    pub fn missing_image(source_id: &SourceId, err: RegistryError) -> Self {
        ResolveError::MissingImageName {
            source_id: source_id.to_string(),
            source: err,
        }
    }

    pub fn unacceptable_advisory(advisory: &str, source_id: &SourceId) -> Self {
        ResolveError::UnacceptableAdvisory {
            advisory: advisory.to_string(),
            source_id: source_id.to_string(),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        ResolveError::Other {
            message: message.into(),
        }
    }
}

/// Terminal record of how a single pair was rectified, or why it wasn't.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResolution {
    pub deployment_id: DeploymentId,
    pub desc: ResolutionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResolveError>,
}

impl DiffResolution {
    pub fn new(deployment_id: DeploymentId, desc: ResolutionType) -> Self {
        Self {
            deployment_id,
            desc,
            error: None,
        }
    }

    pub fn with_error(mut self, error: ResolveError) -> Self {
        self.error = Some(error);
        self
    }
}

impl fmt::Display for DiffResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            Some(err) => write!(f, "{}: {} ({err})", self.deployment_id, self.desc),
            None => write!(f, "{}: {}", self.deployment_id, self.desc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finished_descriptions() {
        assert!(ResolutionType::Created.is_finished());
        assert!(ResolutionType::Updated.is_finished());
        assert!(!ResolutionType::Deleted.is_finished());
        assert!(!ResolutionType::Unchanged.is_finished());
        assert!(!ResolutionType::NotCreated.is_finished());
    }

    #[test]
    fn desc_serializes_to_spec_strings() {
        let json = serde_json::to_string(&ResolutionType::NotCreated).unwrap();
        assert_eq!(json, "\"not created\"");
        let back: ResolutionType = serde_json::from_str("\"created\"").unwrap();
        assert_eq!(back, ResolutionType::Created);
    }

    #[test]
    fn resolution_round_trips_with_error() {
        let resolution = DiffResolution::new(
            DeploymentId::default(),
            ResolutionType::NotCreated,
        )
        .with_error(ResolveError::other("boom"));

        let json = serde_json::to_string(&resolution).unwrap();
        let back: DiffResolution = serde_json::from_str(&json).unwrap();
        assert_eq!(back.desc, ResolutionType::NotCreated);
        assert!(matches!(back.error, Some(ResolveError::Other { .. })));
    }
}
