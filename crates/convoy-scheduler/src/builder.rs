//! Assembly of one observed deployment from one scheduler request.
//!
//! Walks the request through fetch-deploy → image-labels → config-unpack
//! → kind, classifying failures as malformed (structurally incomplete
//! response), ignorable (not something this control plane owns), or
//! client errors eligible for retry.

use std::sync::Arc;

use tracing::debug;

use convoy_core::{
    flavor_from_labels, source_id_from_labels, ArtifactRegistry, Cluster, Clusters,
    DeployConfig, DeployState, DeployStatus, Deployment, DeploymentId, DeploymentKind,
    ExecutorData, ManifestId, SourceId, Volume, VolumeMode,
};

use crate::client::SchedulerClient;
use crate::dtos::{ContainerType, DeployMarker, RequestParent, RequestType, SchedDeploy};
use crate::error::BuildError;
use crate::requests::make_request_id;

/// A request discovered on one scheduler, ready for assembly.
#[derive(Clone)]
pub struct SchedReq {
    pub source_url: String,
    pub client: Arc<dyn SchedulerClient>,
    pub parent: RequestParent,
}

impl SchedReq {
    /// The `{url, request_id}` identity used for retry accounting, when
    /// intact.
    pub fn identity(&self) -> Option<String> {
        if self.source_url.is_empty() {
            return None;
        }
        let id = &self.parent.request.as_ref()?.id;
        if id.is_empty() {
            return None;
        }
        Some(format!("{}:{}", self.source_url, id))
    }
}

/// Assemble the deploy state for one request.
pub async fn build_deploy_state(
    registry: &dyn ArtifactRegistry,
    clusters: &Clusters,
    req: &SchedReq,
) -> Result<DeployState, BuildError> {
    let request = req
        .parent
        .request
        .as_ref()
        .ok_or_else(|| BuildError::Malformed("response included no request".to_string()))?;

    // Fetch the deploy the marker points at.
    let (marker, status) = current_marker(&req.parent, &request.id)?;
    let history = req
        .client
        .get_deploy(&marker.request_id, &marker.deploy_id)
        .await?;
    let deploy = history.deploy.ok_or_else(|| {
        BuildError::Malformed(format!(
            "deploy history for {} included no deploy",
            request.id
        ))
    })?;

    // Resolve the image back to a source identity.
    let (source_id, flavor) = resolve_source(registry, &request.id, &deploy).await?;

    // Work out which of our clusters this scheduler request belongs to.
    let (cluster_name, cluster) =
        resolve_cluster(clusters, &req.source_url, &request.id, &source_id, &flavor)?;

    // Unpack the deploy configuration.
    let mut config = DeployConfig::default();
    config.env = deploy.env.clone();
    if let Some(resources) = &deploy.resources {
        config
            .resources
            .insert("cpus".to_string(), format!("{}", resources.cpus));
        config
            .resources
            .insert("memory".to_string(), format!("{}", resources.memory_mb));
        config
            .resources
            .insert("ports".to_string(), format!("{}", resources.num_ports));
    }
    config.num_instances = request.instances.unwrap_or(0);
    config.schedule = request.schedule.clone();
    if let Some(info) = &deploy.container_info {
        for v in &info.volumes {
            config.volumes.push(Some(Volume {
                host: v.host_path.clone(),
                container: v.container_path.clone(),
                mode: if v.mode == "RW" {
                    VolumeMode::ReadWrite
                } else {
                    VolumeMode::ReadOnly
                },
            }));
        }
    }

    let kind = determine_kind(request.request_type, &request.id)?;

    let deployment = Deployment {
        source_id,
        flavor,
        config,
        kind,
        owners: request.owners.iter().cloned().collect(),
        cluster: Some(cluster),
        cluster_name,
    };

    debug!(deployment = %deployment.id(), request = %request.id, "assembled deploy state");

    Ok(DeployState {
        deployment,
        status,
        executor_message: String::new(),
        executor_data: Some(ExecutorData::Tasks {
            request_id: request.id.clone(),
        }),
        scheduler_url: req.source_url.clone(),
    })
}

/// The deploy marker to follow: pending first, then active.
fn current_marker<'a>(
    parent: &'a RequestParent,
    request_id: &str,
) -> Result<(&'a DeployMarker, DeployStatus), BuildError> {
    let deploy_state = parent.request_deploy_state.as_ref().ok_or_else(|| {
        BuildError::Malformed(format!("response for {request_id} included no deploy state"))
    })?;
    if let Some(pending) = &deploy_state.pending_deploy {
        return Ok((pending, DeployStatus::Pending));
    }
    if let Some(active) = &deploy_state.active_deploy {
        return Ok((active, DeployStatus::Active));
    }
    Err(BuildError::Malformed(format!(
        "deploy state for {request_id} included no deploy markers"
    )))
}

/// Image labels → source identity. Missing container/docker info or
/// label-fetch failures are malformed; a non-docker container isn't ours.
async fn resolve_source(
    registry: &dyn ArtifactRegistry,
    request_id: &str,
    deploy: &SchedDeploy,
) -> Result<(SourceId, String), BuildError> {
    let info = deploy.container_info.as_ref().ok_or_else(|| {
        BuildError::Malformed(format!("deploy for {request_id} included no container info"))
    })?;
    if info.kind != ContainerType::Docker {
        return Err(BuildError::Ignorable(format!(
            "request {request_id} doesn't run a docker container"
        )));
    }
    let docker = info.docker.as_ref().ok_or_else(|| {
        BuildError::Malformed(format!("deploy for {request_id} included no docker info"))
    })?;

    let labels = registry
        .image_labels(&docker.image)
        .await
        .map_err(|e| BuildError::Malformed(format!("labels for {}: {e}", docker.image)))?;

    let source_id = source_id_from_labels(&docker.image, &labels)
        .map_err(|e| BuildError::Malformed(format!("for request {request_id}: {e}")))?;
    let flavor = flavor_from_labels(&labels);
    Ok((source_id, flavor))
}

/// Match the scheduler URL back to a cluster nickname.
///
/// A single candidate wins outright; with several aliases for one URL the
/// hypothetical request ID for each is compared against the real one.
fn resolve_cluster(
    clusters: &Clusters,
    source_url: &str,
    request_id: &str,
    source_id: &SourceId,
    flavor: &str,
) -> Result<(String, Arc<Cluster>), BuildError> {
    let candidates: Vec<(&String, &Arc<Cluster>)> = clusters
        .iter()
        .filter(|(_, c)| c.base_url == source_url)
        .collect();

    match candidates.as_slice() {
        [] => Err(BuildError::Malformed(format!(
            "no cluster definition matches scheduler {source_url}"
        ))),
        [(name, cluster)] => Ok(((*name).clone(), (*cluster).clone())),
        _ => {
            for (name, cluster) in &candidates {
                let hypothetical = DeploymentId::new(
                    ManifestId::new(source_id.location.clone(), flavor),
                    (*name).clone(),
                );
                if let Ok(check_id) = make_request_id(&hypothetical) {
                    if check_id == request_id {
                        return Ok(((*name).clone(), (*cluster).clone()));
                    }
                }
            }
            Err(BuildError::Malformed(format!(
                "no cluster nickname matched request id {request_id} on {source_url}"
            )))
        }
    }
}

fn determine_kind(
    request_type: Option<RequestType>,
    request_id: &str,
) -> Result<DeploymentKind, BuildError> {
    match request_type {
        Some(RequestType::Service) => Ok(DeploymentKind::Service),
        Some(RequestType::Worker) => Ok(DeploymentKind::Worker),
        Some(RequestType::OnDemand) => Ok(DeploymentKind::OnDemand),
        Some(RequestType::Scheduled) => Ok(DeploymentKind::Scheduled),
        Some(RequestType::RunOnce) => Ok(DeploymentKind::Once),
        Some(RequestType::Unrecognized) | None => Err(BuildError::Ignorable(format!(
            "request {request_id} has a type this control plane doesn't manage"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use convoy_core::DeployStatus;

    use super::*;
    use crate::dtos::RequestType;
    use crate::testutil::{
        active_parent, clusters_of, docker_history, source_id, FakeRegistry, FakeScheduler,
    };

    const URL: &str = "http://sched.main";

    fn sched_with(
        parent: RequestParent,
        deploy_key: (&str, &str),
        image: &str,
    ) -> Arc<FakeScheduler> {
        let mut sched = FakeScheduler::new(URL);
        sched.parents = vec![parent];
        sched.deploys.insert(
            (deploy_key.0.to_string(), deploy_key.1.to_string()),
            docker_history(image),
        );
        Arc::new(sched)
    }

    fn registry_with(image: &str) -> FakeRegistry {
        let mut registry = FakeRegistry::default();
        registry.admit(&source_id("github.com/example/widget", "1.2.0"), image);
        registry
    }

    fn req(sched: Arc<FakeScheduler>, parent: RequestParent) -> SchedReq {
        SchedReq {
            source_url: URL.to_string(),
            client: sched,
            parent,
        }
    }

    #[tokio::test]
    async fn assembles_an_active_service() {
        let parent = active_parent("req-widget", "dep-1", 3);
        let sched = sched_with(parent.clone(), ("req-widget", "dep-1"), "img:widget");
        let registry = registry_with("img:widget");
        let clusters = clusters_of(&[("main", URL)]);

        let state = build_deploy_state(&registry, &clusters, &req(sched, parent))
            .await
            .unwrap();

        assert_eq!(state.status, DeployStatus::Active);
        assert_eq!(state.scheduler_url, URL);
        assert_eq!(state.deployment.cluster_name, "main");
        assert_eq!(state.deployment.config.num_instances, 3);
        assert_eq!(state.deployment.kind, DeploymentKind::Service);
        assert_eq!(
            state.deployment.source_id.location.repo,
            "github.com/example/widget"
        );
        assert_eq!(
            state.executor_data.unwrap().request_id(),
            "req-widget"
        );
        assert_eq!(
            state.deployment.config.resources.get("memory").unwrap(),
            "256"
        );
    }

    #[tokio::test]
    async fn pending_marker_wins_over_active() {
        let mut parent = active_parent("req-widget", "dep-old", 1);
        parent
            .request_deploy_state
            .as_mut()
            .unwrap()
            .pending_deploy = Some(crate::dtos::DeployMarker {
            request_id: "req-widget".to_string(),
            deploy_id: "dep-new".to_string(),
        });
        let sched = sched_with(parent.clone(), ("req-widget", "dep-new"), "img:widget");
        let registry = registry_with("img:widget");
        let clusters = clusters_of(&[("main", URL)]);

        let state = build_deploy_state(&registry, &clusters, &req(sched, parent))
            .await
            .unwrap();
        assert_eq!(state.status, DeployStatus::Pending);
    }

    #[tokio::test]
    async fn missing_deploy_state_is_malformed() {
        let mut parent = active_parent("req-widget", "dep-1", 1);
        parent.request_deploy_state = None;
        let sched = sched_with(parent.clone(), ("req-widget", "dep-1"), "img:widget");
        let registry = registry_with("img:widget");
        let clusters = clusters_of(&[("main", URL)]);

        let err = build_deploy_state(&registry, &clusters, &req(sched, parent))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Malformed(_)));
    }

    #[tokio::test]
    async fn missing_markers_are_malformed() {
        let mut parent = active_parent("req-widget", "dep-1", 1);
        parent.request_deploy_state.as_mut().unwrap().active_deploy = None;
        let sched = sched_with(parent.clone(), ("req-widget", "dep-1"), "img:widget");
        let registry = registry_with("img:widget");
        let clusters = clusters_of(&[("main", URL)]);

        let err = build_deploy_state(&registry, &clusters, &req(sched, parent))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Malformed(_)));
    }

    #[tokio::test]
    async fn unmanaged_request_type_is_ignorable() {
        let mut parent = active_parent("req-other", "dep-1", 1);
        parent.request.as_mut().unwrap().request_type = Some(RequestType::Unrecognized);
        let sched = sched_with(parent.clone(), ("req-other", "dep-1"), "img:widget");
        let registry = registry_with("img:widget");
        let clusters = clusters_of(&[("main", URL)]);

        let err = build_deploy_state(&registry, &clusters, &req(sched, parent))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Ignorable(_)));
    }

    #[tokio::test]
    async fn non_docker_container_is_ignorable() {
        let parent = active_parent("req-widget", "dep-1", 1);
        let mut history = docker_history("img:widget");
        history.deploy.as_mut().unwrap().container_info.as_mut().unwrap().kind =
            crate::dtos::ContainerType::Mesos;
        let mut sched = FakeScheduler::new(URL);
        sched.parents = vec![parent.clone()];
        sched
            .deploys
            .insert(("req-widget".to_string(), "dep-1".to_string()), history);
        let registry = registry_with("img:widget");
        let clusters = clusters_of(&[("main", URL)]);

        let err = build_deploy_state(&registry, &clusters, &req(Arc::new(sched), parent))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Ignorable(_)));
    }

    #[tokio::test]
    async fn unlabelled_image_is_malformed() {
        let parent = active_parent("req-widget", "dep-1", 1);
        let sched = sched_with(parent.clone(), ("req-widget", "dep-1"), "img:widget");
        // Registry knows nothing about the image.
        let registry = FakeRegistry::default();
        let clusters = clusters_of(&[("main", URL)]);

        let err = build_deploy_state(&registry, &clusters, &req(sched, parent))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Malformed(_)));
    }

    #[tokio::test]
    async fn client_failure_stays_a_client_error() {
        let parent = active_parent("req-widget", "dep-1", 1);
        let sched = sched_with(parent.clone(), ("req-widget", "dep-1"), "img:widget");
        sched
            .fail_deploy_fetches
            .lock()
            .unwrap()
            .insert("req-widget".to_string(), 1);
        let registry = registry_with("img:widget");
        let clusters = clusters_of(&[("main", URL)]);

        let err = build_deploy_state(&registry, &clusters, &req(sched, parent))
            .await
            .unwrap_err();
        assert!(matches!(err, BuildError::Client(_)));
    }

    #[test]
    fn identity_requires_every_field() {
        let sched = Arc::new(FakeScheduler::new(URL));
        let full = SchedReq {
            source_url: URL.to_string(),
            client: sched.clone(),
            parent: active_parent("req-widget", "dep-1", 1),
        };
        assert_eq!(full.identity().unwrap(), format!("{URL}:req-widget"));

        let mut no_request = full.clone();
        no_request.parent.request = None;
        assert!(no_request.identity().is_none());

        let mut blank_id = full.clone();
        blank_id.parent.request.as_mut().unwrap().id = String::new();
        assert!(blank_id.identity().is_none());

        let mut no_url = full;
        no_url.source_url = String::new();
        assert!(no_url.identity().is_none());
    }
}

