//! Rectification: apply create/modify/delete to the downstream scheduler
//! and classify the outcome of every pair.

use std::sync::Arc;

use tracing::{debug, info, warn};

use convoy_core::{
    Deployable, DeployablePair, DeployStatus, DeploymentKind, DiffResolution, PairKind,
    ResolutionType, ResolveError,
};

use crate::client::{SchedulerClient, SchedulerClientFactory};
use crate::error::SchedulerError;
use crate::requests::{compute_deploy_id, make_request_id};

/// What to do with scheduler requests whose manifests are gone.
///
/// The default never deletes: the operator is warned and the request is
/// left running until someone either removes it by hand or restores the
/// manifest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeletePolicy {
    #[default]
    Warn,
    Propagate,
}

/// Applies the minimum scheduler operations to make actual match intended.
pub struct Rectifier {
    factory: Arc<dyn SchedulerClientFactory>,
    delete_policy: DeletePolicy,
}

impl Rectifier {
    pub fn new(factory: Arc<dyn SchedulerClientFactory>) -> Self {
        Self {
            factory,
            delete_policy: DeletePolicy::default(),
        }
    }

    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    /// Rectify one pair: act on the scheduler per the pair kind and
    /// report a terminal resolution. Errors never escape as `Err`; they
    /// ride in the resolution.
    pub async fn rectify(&self, pair: &DeployablePair) -> DiffResolution {
        match pair.kind() {
            PairKind::Same => {
                let mut resolution =
                    DiffResolution::new(pair.id.clone(), ResolutionType::Unchanged);
                if pair.post.as_ref().map(|p| p.status) == Some(DeployStatus::Failed) {
                    resolution.error = Some(ResolveError::FailedStatus);
                }
                resolution
            }
            PairKind::Added => self.rectify_create(pair).await,
            PairKind::Removed => self.rectify_delete(pair).await,
            PairKind::Modified => self.rectify_modify(pair).await,
        }
    }

    async fn rectify_create(&self, pair: &DeployablePair) -> DiffResolution {
        let resolution = DiffResolution::new(pair.id.clone(), ResolutionType::Created);
        let Some(post) = &pair.post else {
            return resolution_error(
                pair,
                ResolutionType::NotCreated,
                ResolveError::other("added pair has no intended side"),
            );
        };
        debug!(deployment = %pair.id, "rectifying creation");

        match self.create(pair, post).await {
            Ok(()) => resolution,
            Err(err) => {
                let error = if err.is_client_error() {
                    transport(&err)
                } else {
                    ResolveError::Create {
                        deployment: Box::new(post.deployment.clone()),
                        message: err.to_string(),
                    }
                };
                resolution_error(pair, ResolutionType::NotCreated, error)
            }
        }
    }

    async fn create(
        &self,
        pair: &DeployablePair,
        post: &Deployable,
    ) -> Result<(), SchedulerError> {
        let client = self.client_for(post)?;
        let request_id = self.request_id_for(pair, post)?;
        client.post_request(post, &request_id).await?;
        if parked(post) {
            debug!(deployment = %pair.id, "zero instances, request parked without deploy");
            return Ok(());
        }
        let deploy_id = compute_deploy_id(&post.deployment.source_id);
        client.deploy(post, &request_id, &deploy_id).await
    }

    async fn rectify_delete(&self, pair: &DeployablePair) -> DiffResolution {
        let Some(prior) = &pair.prior else {
            return resolution_error(
                pair,
                ResolutionType::NotDeleted,
                ResolveError::other("removed pair has no observed side"),
            );
        };
        let Some(request_id) = pair.executor_data.as_ref().map(|d| d.request_id()) else {
            return resolution_error(
                pair,
                ResolutionType::NotDeleted,
                ResolveError::Delete {
                    deployment: Box::new(prior.deployment.clone()),
                    message: "removal record carries no scheduler request id".to_string(),
                },
            );
        };

        match self.delete_policy {
            DeletePolicy::Warn => {
                // TODO: alert the owners of this request that no manifest
                // backs it; they should delete it or restore the manifest.
                warn!(
                    %request_id,
                    deployment = %pair.id,
                    "NOT deleting scheduler request for removed manifest"
                );
                DiffResolution::new(pair.id.clone(), ResolutionType::Deleted)
            }
            DeletePolicy::Propagate => {
                let result = match self.client_for(prior) {
                    Ok(client) => {
                        client
                            .delete_request(
                                request_id,
                                "deleting request for removed manifest",
                            )
                            .await
                    }
                    Err(e) => Err(e),
                };
                match result {
                    Ok(()) => {
                        info!(%request_id, deployment = %pair.id, "request deleted");
                        DiffResolution::new(pair.id.clone(), ResolutionType::Deleted)
                    }
                    Err(err) => resolution_error(
                        pair,
                        ResolutionType::NotDeleted,
                        ResolveError::Delete {
                            deployment: Box::new(prior.deployment.clone()),
                            message: err.to_string(),
                        },
                    ),
                }
            }
        }
    }

    async fn rectify_modify(&self, pair: &DeployablePair) -> DiffResolution {
        let (Some(prior), Some(post)) = (&pair.prior, &pair.post) else {
            return resolution_error(
                pair,
                ResolutionType::NotUpdated,
                ResolveError::other("modified pair is missing a side"),
            );
        };

        match self.modify(pair, prior, post).await {
            Ok(()) => {
                let mut resolution =
                    DiffResolution::new(pair.id.clone(), ResolutionType::Updated);
                if prior.status == DeployStatus::Failed || post.status == DeployStatus::Failed
                {
                    resolution.error = Some(ResolveError::FailedStatus);
                }
                resolution
            }
            Err(err) => {
                let error = if err.is_client_error() {
                    transport(&err)
                } else {
                    ResolveError::Change {
                        prior: Box::new(prior.deployment.clone()),
                        post: Box::new(post.deployment.clone()),
                        message: err.to_string(),
                    }
                };
                resolution_error(pair, ResolutionType::NotUpdated, error)
            }
        }
    }

    async fn modify(
        &self,
        pair: &DeployablePair,
        prior: &Deployable,
        post: &Deployable,
    ) -> Result<(), SchedulerError> {
        let client = self.client_for(post)?;
        let request_id = match pair.executor_data.as_ref() {
            Some(data) => data.request_id().to_string(),
            None => self.request_id_for(pair, post)?,
        };

        if changes_req(prior, post) {
            debug!(deployment = %pair.id, %request_id, "updating request shape");
            client.post_request(post, &request_id).await?;
        } else {
            debug!(deployment = %pair.id, "no change to request shape");
        }

        if changes_dep(prior, post) && !parked(post) {
            let deploy_id = compute_deploy_id(&post.deployment.source_id);
            debug!(deployment = %pair.id, %request_id, %deploy_id, "deploying");
            client.deploy(post, &request_id, &deploy_id).await?;
        } else {
            debug!(deployment = %pair.id, "no change to deploy for request");
        }

        Ok(())
    }

    fn client_for(
        &self,
        deployable: &Deployable,
    ) -> Result<Arc<dyn SchedulerClient>, SchedulerError> {
        let cluster = deployable.deployment.cluster.as_ref().ok_or_else(|| {
            SchedulerError::InvalidDeploy(format!(
                "no cluster resolved for {}",
                deployable.deployment.id()
            ))
        })?;
        Ok(self.factory.client(&cluster.base_url))
    }

    fn request_id_for(
        &self,
        pair: &DeployablePair,
        post: &Deployable,
    ) -> Result<String, SchedulerError> {
        if let Some(explicit) = &post.deployment.config.scheduler_request_id {
            return Ok(explicit.clone());
        }
        make_request_id(&pair.id).map_err(|e| SchedulerError::InvalidDeploy(e.to_string()))
    }
}

fn resolution_error(
    pair: &DeployablePair,
    desc: ResolutionType,
    error: ResolveError,
) -> DiffResolution {
    debug!(deployment = %pair.id, %error, "rectification failed");
    DiffResolution::new(pair.id.clone(), desc).with_error(error)
}

/// Intentional absence: zero instances and no artifact means the request
/// exists but nothing should be deployed onto it.
fn parked(post: &Deployable) -> bool {
    post.artifact.is_none() && post.deployment.config.num_instances == 0
}

fn transport(err: &SchedulerError) -> ResolveError {
    ResolveError::Transport {
        status: err.status().unwrap_or(0),
        message: err.to_string(),
    }
}

/// Whether the long-lived request shape must be re-posted.
pub fn changes_req(prior: &Deployable, post: &Deployable) -> bool {
    (prior.deployment.kind == DeploymentKind::Scheduled
        && prior.deployment.config.schedule != post.deployment.config.schedule)
        || prior.deployment.kind != post.deployment.kind
        || prior.deployment.config.num_instances != post.deployment.config.num_instances
        || prior.deployment.owners != post.deployment.owners
}

/// Whether a new deploy revision must be pushed.
pub fn changes_dep(prior: &Deployable, post: &Deployable) -> bool {
    post.status == DeployStatus::Failed
        || prior.status == DeployStatus::Failed
        || !(prior.deployment.source_id == post.deployment.source_id
            && prior.deployment.config.resources == post.deployment.config.resources
            && prior.deployment.config.env == post.deployment.config.env
            && prior.deployment.config.volumes == post.deployment.config.volumes
            && prior.deployment.config.startup == post.deployment.config.startup)
}
