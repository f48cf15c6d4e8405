//! The persisted shape of the global deployment manifest.
//!
//! A `State` is the authoritative intent: manifests (what to run, per
//! cluster) plus shared definitions (the clusters themselves and global
//! environment defaults). Deployments are a derived, flattened view.

use std::collections::BTreeMap;
use std::sync::Arc;

use semver::Version;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use convoy_core::{
    Cluster, DeployConfig, Deployment, DeploymentKind, Deployments, Flaw, ManifestId,
    OwnerSet, SourceId, SourceLocation,
};

use crate::error::{StateError, StateResult};

/// Shared definitions: the clusters convoy drives and global env defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Defs {
    pub clusters: BTreeMap<String, Cluster>,
    pub env_vars: BTreeMap<String, String>,
}

/// One version of one source, configured for one cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploySpec {
    pub version: Version,
    #[serde(flatten)]
    pub config: DeployConfig,
}

/// Intent for a single source tree: which version and configuration to
/// run in each cluster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Manifest {
    pub source: SourceLocation,
    pub flavor: String,
    pub kind: DeploymentKind,
    pub owners: OwnerSet,
    /// Cluster name → deploy spec.
    pub deployments: BTreeMap<String, DeploySpec>,
}

impl Manifest {
    pub fn id(&self) -> ManifestId {
        ManifestId::new(self.source.clone(), self.flavor.clone())
    }

    /// Shape-check every per-cluster spec.
    pub fn validate(&self) -> Vec<Flaw> {
        self.deployments
            .values()
            .flat_map(|spec| spec.config.validate())
            .collect()
    }

    /// Repair every per-cluster spec in place; returns remaining flaws.
    pub fn repair(&mut self) -> Vec<Flaw> {
        let mut remaining = Vec::new();
        for spec in self.deployments.values_mut() {
            let flaws = spec.config.validate();
            remaining.extend(spec.config.repair(flaws));
        }
        remaining
    }
}

/// The full global deployment manifest.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct State {
    /// Keyed by manifest identity; serialized as a list, keys recomputed
    /// on load.
    #[serde(with = "manifests_as_list")]
    pub manifests: BTreeMap<ManifestId, Manifest>,
    pub defs: Defs,
    /// Optimistic concurrency token from the read this state came from;
    /// never persisted as content.
    #[serde(skip)]
    pub etag: Option<String>,
}

mod manifests_as_list {
    use super::{BTreeMap, Manifest, ManifestId};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<ManifestId, Manifest>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let list: Vec<&Manifest> = map.values().collect();
        list.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<ManifestId, Manifest>, D::Error> {
        let list = Vec::<Manifest>::deserialize(deserializer)?;
        Ok(list.into_iter().map(|m| (m.id(), m)).collect())
    }
}

impl State {
    /// Content hash of this state, used as the optimistic write token.
    ///
    /// BTreeMap field order makes the JSON rendering canonical.
    pub fn compute_etag(&self) -> StateResult<String> {
        let manifests: Vec<&Manifest> = self.manifests.values().collect();
        let content = serde_json::to_vec(&(&manifests, &self.defs))
            .map_err(|e| StateError::Serialize(e.to_string()))?;
        let digest = Sha256::digest(&content);
        let mut hex = String::with_capacity(64);
        for byte in digest {
            hex.push_str(&format!("{byte:02x}"));
        }
        Ok(hex)
    }

    /// Insert or replace a manifest under its own identity.
    pub fn set_manifest(&mut self, manifest: Manifest) {
        self.manifests.insert(manifest.id(), manifest);
    }

    pub fn get_manifest(&self, id: &ManifestId) -> Option<&Manifest> {
        self.manifests.get(id)
    }

    /// Remove a manifest; returns true if it existed.
    pub fn remove_manifest(&mut self, id: &ManifestId) -> bool {
        self.manifests.remove(id).is_some()
    }

    /// Flatten manifests × clusters into the keyed deployment set,
    /// resolving each deployment's cluster definition.
    pub fn deployments(&self) -> StateResult<Deployments> {
        let clusters: BTreeMap<&String, Arc<Cluster>> = self
            .defs
            .clusters
            .iter()
            .map(|(name, c)| (name, Arc::new(c.clone())))
            .collect();

        let mut deployments = Deployments::new();
        for manifest in self.manifests.values() {
            for (cluster_name, spec) in &manifest.deployments {
                let cluster = clusters
                    .get(cluster_name)
                    .ok_or_else(|| StateError::UnknownCluster(cluster_name.clone()))?;
                deployments.set(Deployment {
                    source_id: SourceId::new(manifest.source.clone(), spec.version.clone()),
                    flavor: manifest.flavor.clone(),
                    config: spec.config.clone(),
                    kind: manifest.kind,
                    owners: manifest.owners.clone(),
                    cluster: Some(cluster.clone()),
                    cluster_name: cluster_name.clone(),
                });
            }
        }
        Ok(deployments)
    }

    /// Fold changed deployments back into their manifests, creating
    /// manifests that don't exist yet.
    pub fn update_deployments(
        &mut self,
        deployments: impl IntoIterator<Item = Deployment>,
    ) -> StateResult<()> {
        for dep in deployments {
            if !self.defs.clusters.contains_key(&dep.cluster_name) {
                return Err(StateError::UnknownCluster(dep.cluster_name));
            }
            let id = ManifestId::new(dep.source_id.location.clone(), dep.flavor.clone());
            let manifest = self.manifests.entry(id).or_insert_with(|| Manifest {
                source: dep.source_id.location.clone(),
                flavor: dep.flavor.clone(),
                kind: dep.kind,
                owners: dep.owners.clone(),
                deployments: BTreeMap::new(),
            });
            manifest.kind = dep.kind;
            manifest.owners = dep.owners;
            manifest.deployments.insert(
                dep.cluster_name,
                DeploySpec {
                    version: dep.source_id.version,
                    config: dep.config,
                },
            );
        }
        Ok(())
    }
}
