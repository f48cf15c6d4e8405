//! Full resolution: drive every cluster's scheduler toward the intended
//! deployment set and report what happened, pair by pair.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use convoy_core::{
    resolve_pair, ArtifactRegistry, Clusters, DeployState, Deployment, Deployments,
    DiffResolution, ResolutionType, ResolveError,
};

use crate::assembler::{running_deployments, AssemblerOpts};
use crate::client::SchedulerClientFactory;
use crate::error::AssembleError;
use crate::rectify::{DeletePolicy, Rectifier};

/// The outcome of one full resolve pass: a terminal record per pair.
#[derive(Debug, Default)]
pub struct ResolveReport {
    pub resolutions: Vec<DiffResolution>,
}

impl ResolveReport {
    /// Resolutions grouped by cluster name.
    pub fn by_cluster(&self) -> BTreeMap<&str, Vec<&DiffResolution>> {
        let mut grouped: BTreeMap<&str, Vec<&DiffResolution>> = BTreeMap::new();
        for resolution in &self.resolutions {
            grouped
                .entry(resolution.deployment_id.cluster.as_str())
                .or_default()
                .push(resolution);
        }
        grouped
    }

    /// The resolutions that carry errors.
    pub fn failed(&self) -> impl Iterator<Item = &DiffResolution> {
        self.resolutions.iter().filter(|r| r.error.is_some())
    }
}

/// Outcome of a single-deployment rectification, including the state
/// observed after acting.
#[derive(Debug)]
pub struct SingleRectification {
    pub resolution: DiffResolution,
    pub state: Option<DeployState>,
}

/// The converging controller: observe, diff, rectify, report.
pub struct Resolver {
    factory: Arc<dyn SchedulerClientFactory>,
    registry: Arc<dyn ArtifactRegistry>,
    rectifier: Arc<Rectifier>,
    opts: AssemblerOpts,
}

impl Resolver {
    pub fn new(
        factory: Arc<dyn SchedulerClientFactory>,
        registry: Arc<dyn ArtifactRegistry>,
    ) -> Self {
        Self {
            rectifier: Arc::new(Rectifier::new(factory.clone())),
            factory,
            registry,
            opts: AssemblerOpts::default(),
        }
    }

    pub fn with_opts(mut self, opts: AssemblerOpts) -> Self {
        self.opts = opts;
        self
    }

    pub fn with_delete_policy(mut self, policy: DeletePolicy) -> Self {
        self.rectifier =
            Arc::new(Rectifier::new(self.factory.clone()).with_delete_policy(policy));
        self
    }

    /// One full convergence pass over every cluster.
    pub async fn resolve(
        &self,
        intended: Deployments,
        clusters: &Clusters,
    ) -> Result<ResolveReport, AssembleError> {
        info!(intended = intended.len(), clusters = clusters.len(), "resolving");
        let actual = running_deployments(
            self.factory.clone(),
            self.registry.clone(),
            clusters,
            self.opts.clone(),
        )
        .await?;
        debug!(actual = actual.len(), "actual state assembled");

        let pairs = intended.diff(&actual);
        let mut tasks: JoinSet<(usize, DiffResolution)> = JoinSet::new();
        for (index, pair) in pairs.into_iter().enumerate() {
            let registry = self.registry.clone();
            let rectifier = self.rectifier.clone();
            tasks.spawn(async move {
                let id = pair.id.clone();
                let (annotated, early) = resolve_pair(registry.as_ref(), pair).await;
                let resolution = match (annotated, early) {
                    (_, Some(resolution)) => resolution,
                    (Some(pair), None) => rectifier.rectify(&pair).await,
                    (None, None) => DiffResolution::new(id, ResolutionType::Unchanged)
                        .with_error(ResolveError::other("pair vanished in name resolution")),
                };
                (index, resolution)
            });
        }

        let mut indexed = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(entry) => indexed.push(entry),
                Err(e) => warn!(error = %e, "rectification task died"),
            }
        }
        indexed.sort_by_key(|(index, _)| *index);

        let report = ResolveReport {
            resolutions: indexed.into_iter().map(|(_, r)| r).collect(),
        };
        info!(
            resolutions = report.resolutions.len(),
            failures = report.failed().count(),
            "resolve pass complete"
        );
        Ok(report)
    }

    /// Rectify a single deployment against its cluster and observe the
    /// resulting state.
    pub async fn rectify_single(
        &self,
        intended: Deployment,
        clusters: &Clusters,
    ) -> SingleRectification {
        let id = intended.id();
        let Some(cluster) = clusters.get(&intended.cluster_name) else {
            return SingleRectification {
                resolution: DiffResolution::new(id.clone(), ResolutionType::NotCreated)
                    .with_error(ResolveError::other(format!(
                        "unknown cluster {:?}",
                        intended.cluster_name
                    ))),
                state: None,
            };
        };
        let scoped: Clusters = [(intended.cluster_name.clone(), cluster.clone())]
            .into_iter()
            .collect();

        let actual = match running_deployments(
            self.factory.clone(),
            self.registry.clone(),
            &scoped,
            self.opts.clone(),
        )
        .await
        {
            Ok(actual) => actual,
            Err(e) => {
                return SingleRectification {
                    resolution: DiffResolution::new(id.clone(), ResolutionType::NotCreated)
                        .with_error(ResolveError::other(e.to_string())),
                    state: None,
                }
            }
        };

        let single: Deployments = [intended].into_iter().collect();
        let pairs = single.diff(&actual);
        // Everything else in the cluster shows up as Removed here; only
        // the requested deployment is acted on.
        let Some(pair) = pairs.into_iter().find(|p| p.id == id) else {
            return SingleRectification {
                resolution: DiffResolution::new(id.clone(), ResolutionType::NotCreated)
                    .with_error(ResolveError::other("deployment missing from its own diff")),
                state: None,
            };
        };

        let resolution = {
            let (annotated, early) = resolve_pair(self.registry.as_ref(), pair).await;
            match (annotated, early) {
                (_, Some(resolution)) => resolution,
                (Some(pair), None) => self.rectifier.rectify(&pair).await,
                (None, None) => DiffResolution::new(id.clone(), ResolutionType::Unchanged),
            }
        };

        // Observe the post-rectification state for the poller.
        let state = match running_deployments(
            self.factory.clone(),
            self.registry.clone(),
            &scoped,
            self.opts.clone(),
        )
        .await
        {
            Ok(after) => after.get(&id).cloned(),
            Err(e) => {
                debug!(deployment = %id, error = %e, "post-rectification observation failed");
                None
            }
        };

        SingleRectification { resolution, state }
    }
}
