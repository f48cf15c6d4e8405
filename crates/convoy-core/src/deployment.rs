//! The deployment value type and its cluster context.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::DeployConfig;
use crate::ids::{DeploymentId, ManifestId, SourceId};

/// Set of deployment owner identities (email addresses, team handles).
pub type OwnerSet = BTreeSet<String>;

/// One cluster the control plane drives, as declared in the GDM defs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Cluster {
    pub name: String,
    /// Base URL of the cluster's external scheduler.
    pub base_url: String,
    /// Advisory qualities an artifact may carry and still deploy here.
    pub allowed_advisories: Vec<String>,
    /// Cluster-wide environment defaults.
    pub env: BTreeMap<String, String>,
}

/// Cluster name → definition, shared across the pipeline.
pub type Clusters = BTreeMap<String, Arc<Cluster>>;

/// How the scheduler should run a deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentKind {
    #[default]
    Service,
    Worker,
    OnDemand,
    Scheduled,
    Once,
}

impl fmt::Display for DeploymentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeploymentKind::Service => "service",
            DeploymentKind::Worker => "worker",
            DeploymentKind::OnDemand => "on_demand",
            DeploymentKind::Scheduled => "scheduled",
            DeploymentKind::Once => "once",
        };
        write!(f, "{name}")
    }
}

/// A single deployment: one versioned source, configured for one cluster.
///
/// Values flow through the diff and rectify pipeline by clone; no stage
/// mutates upstream state. Maps, vectors, and nested configs are owned, so
/// `Clone` is a deep copy by construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub source_id: SourceId,
    #[serde(default)]
    pub flavor: String,
    pub config: DeployConfig,
    #[serde(default)]
    pub kind: DeploymentKind,
    #[serde(default)]
    pub owners: OwnerSet,
    /// Resolved cluster definition; populated from the GDM defs, never
    /// serialized.
    #[serde(skip)]
    pub cluster: Option<Arc<Cluster>>,
    pub cluster_name: String,
}

impl Deployment {
    pub fn id(&self) -> DeploymentId {
        DeploymentId::new(
            ManifestId::new(self.source_id.location.clone(), self.flavor.clone()),
            self.cluster_name.clone(),
        )
    }

    /// Differences against another deployment across every semantic field.
    pub fn diff(&self, other: &Deployment) -> (bool, Vec<String>) {
        let mut diffs = Vec::new();
        if self.cluster_name != other.cluster_name {
            diffs.push(format!(
                "cluster; this: {}; other: {}",
                self.cluster_name, other.cluster_name
            ));
        }
        if self.source_id != other.source_id {
            diffs.push(format!(
                "source; this: {}; other: {}",
                self.source_id, other.source_id
            ));
        }
        if self.flavor != other.flavor {
            diffs.push(format!(
                "flavor; this: {:?}; other: {:?}",
                self.flavor, other.flavor
            ));
        }
        if self.kind != other.kind {
            diffs.push(format!(
                "kind; this: {}; other: {}",
                self.kind, other.kind
            ));
        }
        if self.owners != other.owners {
            diffs.push(format!(
                "owners; this: {:?}; other: {:?}",
                self.owners, other.owners
            ));
        }
        diffs.extend(self.config.diff(&other.config));
        (!diffs.is_empty(), diffs)
    }

    pub fn equal(&self, other: &Deployment) -> bool {
        !self.diff(other).0
    }
}

impl fmt::Display for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id(), self.source_id.version)
    }
}
