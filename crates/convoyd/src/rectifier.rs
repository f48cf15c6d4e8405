//! Bridges the API rectification queue to the scheduler resolver.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use convoy_api::SingleRectifier;
use convoy_core::{
    Clusters, DeployState, Deployment, DiffResolution, ResolutionType, ResolveError,
};
use convoy_scheduler::Resolver;
use convoy_state::{StateManager, StateReader};

/// Executes queued single rectifications against the live cluster defs.
pub struct QueueRectifier {
    resolver: Resolver,
    manager: Arc<dyn StateManager>,
}

impl QueueRectifier {
    pub fn new(resolver: Resolver, manager: Arc<dyn StateManager>) -> Self {
        Self { resolver, manager }
    }

    fn clusters(&self) -> Result<Clusters, ResolveError> {
        let state = self
            .manager
            .read_state()
            .map_err(|e| ResolveError::other(e.to_string()))?;
        Ok(state
            .defs
            .clusters
            .iter()
            .map(|(name, cluster)| (name.clone(), Arc::new(cluster.clone())))
            .collect())
    }
}

#[async_trait]
impl SingleRectifier for QueueRectifier {
    async fn rectify_single(
        &self,
        mut deployment: Deployment,
    ) -> (DiffResolution, Option<DeployState>) {
        let id = deployment.id();
        let clusters = match self.clusters() {
            Ok(clusters) => clusters,
            Err(error) => {
                return (
                    DiffResolution::new(id, ResolutionType::NotCreated).with_error(error),
                    None,
                )
            }
        };

        // Queued deployments arrive with the cluster ref unresolved.
        deployment.cluster = clusters.get(&deployment.cluster_name).cloned();
        debug!(deployment = %id, "rectifying from queue");

        let outcome = self.resolver.rectify_single(deployment, &clusters).await;
        (outcome.resolution, outcome.state)
    }
}
