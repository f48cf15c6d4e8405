//! Keyed deployment collections and the pairwise diff engine.
//!
//! The diff walks the union of `DeploymentId` keys across the intended and
//! existing sets and emits one [`DeployablePair`] per key. Keys iterate in
//! `BTreeMap` order, so a given pair of inputs always yields the same
//! stream.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::artifact::BuildArtifact;
use crate::deploy_state::{DeployState, DeployStatus, ExecutorData};
use crate::deployment::Deployment;
use crate::ids::DeploymentId;

/// Intended deployments, keyed by identity.
///
/// Serializes as a list; keys are recomputed from the values on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Deployment>", into = "Vec<Deployment>")]
pub struct Deployments(BTreeMap<DeploymentId, Deployment>);

/// Observed deployment states, keyed by identity.
///
/// Serializes as a list; keys are recomputed from the values on load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(from = "Vec<DeployState>", into = "Vec<DeployState>")]
pub struct DeployStates(BTreeMap<DeploymentId, DeployState>);

impl From<Vec<Deployment>> for Deployments {
    fn from(list: Vec<Deployment>) -> Self {
        list.into_iter().collect()
    }
}

impl From<Deployments> for Vec<Deployment> {
    fn from(deps: Deployments) -> Self {
        deps.0.into_values().collect()
    }
}

impl From<Vec<DeployState>> for DeployStates {
    fn from(list: Vec<DeployState>) -> Self {
        list.into_iter().collect()
    }
}

impl From<DeployStates> for Vec<DeployState> {
    fn from(states: DeployStates) -> Self {
        states.0.into_values().collect()
    }
}

impl Deployments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert under the deployment's own identity, replacing any previous
    /// entry for that key.
    pub fn set(&mut self, deployment: Deployment) {
        self.0.insert(deployment.id(), deployment);
    }

    pub fn get(&self, id: &DeploymentId) -> Option<&Deployment> {
        self.0.get(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeploymentId, &Deployment)> {
        self.0.iter()
    }

    pub fn into_values(self) -> impl Iterator<Item = Deployment> {
        self.0.into_values()
    }

    /// Keep only deployments satisfying the predicate.
    pub fn filter(&self, keep: impl Fn(&Deployment) -> bool) -> Deployments {
        Deployments(
            self.0
                .iter()
                .filter(|(_, d)| keep(d))
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        )
    }

    /// Diff this intended set against an observed set.
    ///
    /// Emits one pair per key in the union, classified per the pair kind
    /// rules. Both inputs are snapshots; the result borrows nothing.
    pub fn diff(&self, existing: &DeployStates) -> Vec<DeployablePair> {
        let mut keys: Vec<&DeploymentId> = self.0.keys().chain(existing.0.keys()).collect();
        keys.sort();
        keys.dedup();

        let mut pairs = Vec::with_capacity(keys.len());
        for id in keys {
            let actual = existing.0.get(id);
            let prior = actual.map(|state| Deployable {
                deployment: state.deployment.clone(),
                status: state.status,
                artifact: None,
            });
            // Intended deployables carry the observed status when one
            // exists, so failed-but-matching deployments stay visible to
            // the rectifier.
            let post = self.0.get(id).map(|dep| Deployable {
                deployment: dep.clone(),
                status: actual.map(|s| s.status).unwrap_or(DeployStatus::Any),
                artifact: None,
            });
            pairs.push(DeployablePair {
                id: id.clone(),
                prior,
                post,
                executor_data: actual.and_then(|s| s.executor_data.clone()),
            });
        }
        pairs
    }
}

impl FromIterator<Deployment> for Deployments {
    fn from_iter<T: IntoIterator<Item = Deployment>>(iter: T) -> Self {
        let mut deps = Deployments::new();
        for d in iter {
            deps.set(d);
        }
        deps
    }
}

impl DeployStates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, state: DeployState) {
        self.0.insert(state.deployment.id(), state);
    }

    pub fn get(&self, id: &DeploymentId) -> Option<&DeployState> {
        self.0.get(id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeploymentId, &DeployState)> {
        self.0.iter()
    }

    pub fn into_values(self) -> impl Iterator<Item = DeployState> {
        self.0.into_values()
    }

    /// Drop the status layer, keeping the nested deployments.
    pub fn ignoring_status(&self) -> Deployments {
        self.0
            .values()
            .map(|state| state.deployment.clone())
            .collect()
    }
}

impl FromIterator<DeployState> for DeployStates {
    fn from_iter<T: IntoIterator<Item = DeployState>>(iter: T) -> Self {
        let mut states = DeployStates::new();
        for s in iter {
            states.set(s);
        }
        states
    }
}

/// One side of a diff pair: a deployment, its observed status, and (after
/// name resolution) the artifact that realizes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployable {
    pub deployment: Deployment,
    #[serde(default)]
    pub status: DeployStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact: Option<BuildArtifact>,
}

/// Classification of a diff pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairKind {
    Same,
    Added,
    Removed,
    Modified,
}

/// A pre/post pair for one deployment identity.
///
/// `prior` is the observed side, `post` the intended side; either may be
/// absent. `executor_data` carries the scheduler-side context the
/// rectifier needs for removals and modifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployablePair {
    pub id: DeploymentId,
    pub prior: Option<Deployable>,
    pub post: Option<Deployable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_data: Option<ExecutorData>,
}

impl DeployablePair {
    pub fn kind(&self) -> PairKind {
        match (&self.prior, &self.post) {
            (None, Some(_)) => PairKind::Added,
            (Some(_), None) => PairKind::Removed,
            (Some(prior), Some(post)) => {
                if prior.deployment.equal(&post.deployment) {
                    PairKind::Same
                } else {
                    PairKind::Modified
                }
            }
            (None, None) => PairKind::Same,
        }
    }
}

/// Diff pairs grouped by kind.
#[derive(Debug, Default)]
pub struct DiffSet {
    pub new: Vec<DeployablePair>,
    pub gone: Vec<DeployablePair>,
    pub same: Vec<DeployablePair>,
    pub changed: Vec<DeployablePair>,
}

impl DiffSet {
    /// Group a pair stream by kind.
    pub fn collect(pairs: Vec<DeployablePair>) -> DiffSet {
        let mut set = DiffSet::default();
        for pair in pairs {
            match pair.kind() {
                PairKind::Added => set.new.push(pair),
                PairKind::Removed => set.gone.push(pair),
                PairKind::Same => set.same.push(pair),
                PairKind::Modified => set.changed.push(pair),
            }
        }
        set
    }
}
