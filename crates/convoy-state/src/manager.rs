//! State manager trait and the scoped decorators built on it.
//!
//! `StateManager` is the whole-GDM read/write contract; `ClusterManager`
//! and `DeploymentManager` narrow it to one cluster's deployments or one
//! deployment, reading and writing through the full state.

use convoy_core::{Deployment, DeploymentId, Deployments, User};

use crate::error::{StateError, StateResult};
use crate::types::State;

/// Reads the full GDM, tagging it with its etag.
pub trait StateReader: Send + Sync {
    fn read_state(&self) -> StateResult<State>;
}

/// Writes the full GDM; a stale etag on the state yields
/// [`StateError::Conflict`].
pub trait StateWriter: Send + Sync {
    fn write_state(&self, state: &State, user: &User) -> StateResult<()>;
}

/// Whole-GDM persistence: read plus conditional write.
pub trait StateManager: StateReader + StateWriter {}

impl<T: StateReader + StateWriter> StateManager for T {}

/// Reads and writes deployments scoped by cluster.
pub trait ClusterManager: Send + Sync {
    fn read_cluster(&self, cluster_name: &str) -> StateResult<Deployments>;
    fn write_cluster(
        &self,
        cluster_name: &str,
        deps: Deployments,
        user: &User,
    ) -> StateResult<()>;
}

/// Loads and stores individual deployments.
pub trait DeploymentManager: Send + Sync {
    fn read_deployment(&self, id: &DeploymentId) -> StateResult<Deployment>;
    fn write_deployment(&self, dep: Deployment, user: &User) -> StateResult<()>;
}

/// Wrap a `StateManager` so it fulfills [`ClusterManager`].
pub fn cluster_manager<M: StateManager>(manager: M) -> impl ClusterManager {
    ClusterDecorator { manager }
}

/// Wrap a `StateManager` so it fulfills [`DeploymentManager`].
pub fn deployment_manager<M: StateManager>(manager: M) -> impl DeploymentManager {
    DeploymentDecorator { manager }
}

struct ClusterDecorator<M> {
    manager: M,
}

impl<M: StateManager> ClusterManager for ClusterDecorator<M> {
    fn read_cluster(&self, cluster_name: &str) -> StateResult<Deployments> {
        let state = self.manager.read_state()?;
        let deps = state.deployments()?;
        Ok(deps.filter(|d| d.cluster_name == cluster_name))
    }

    fn write_cluster(
        &self,
        cluster_name: &str,
        deps: Deployments,
        user: &User,
    ) -> StateResult<()> {
        let mut state = self.manager.read_state()?;
        // Replace this cluster's deployments wholesale; every other
        // cluster's entries stay as they are.
        for manifest in state.manifests.values_mut() {
            manifest.deployments.remove(cluster_name);
        }
        state.update_deployments(deps.into_values())?;
        state.manifests.retain(|_, m| !m.deployments.is_empty());
        self.manager.write_state(&state, user)
    }
}

struct DeploymentDecorator<M> {
    manager: M,
}

impl<M: StateManager> DeploymentManager for DeploymentDecorator<M> {
    fn read_deployment(&self, id: &DeploymentId) -> StateResult<Deployment> {
        let state = self.manager.read_state()?;
        let deps = state.deployments()?;
        deps.get(id)
            .cloned()
            .ok_or_else(|| StateError::NoSuchDeployment(id.to_string()))
    }

    fn write_deployment(&self, dep: Deployment, user: &User) -> StateResult<()> {
        let mut state = self.manager.read_state()?;
        state.update_deployments([dep])?;
        self.manager.write_state(&state, user)
    }
}
