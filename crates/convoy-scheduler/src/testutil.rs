//! In-crate fakes and fixtures for scheduler pipeline tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use convoy_core::{
    labels_for, parse_version, ArtifactRegistry, BuildArtifact, Cluster, Clusters,
    DeployConfig, DeployStatus, Deployable, Deployment, DeploymentKind, RegistryError,
    SourceId, SourceLocation,
};

use crate::client::{build_request, SchedulerClient, SchedulerClientFactory};
use crate::dtos::{
    ContainerInfo, ContainerType, DeployHistory, DeployMarker, DockerInfo, RequestDeployState,
    RequestParent, RequestType, SchedDeploy, SchedRequest, SchedResources,
};
use crate::error::{SchedulerError, SchedulerResult};

/// Always-fail sentinel for [`FakeScheduler::fail_deploy_fetches`].
pub const ALWAYS: u32 = u32::MAX;

/// Scripted in-memory scheduler.
#[derive(Default)]
pub struct FakeScheduler {
    pub base_url: String,
    pub parents: Vec<RequestParent>,
    pub deploys: HashMap<(String, String), DeployHistory>,
    /// request_id → how many get_deploy calls to fail first.
    pub fail_deploy_fetches: Mutex<HashMap<String, u32>>,
    /// Status for post_request failures; 0 means a transport error.
    pub fail_post_request: Option<u16>,
    /// Status for deploy failures; 0 means a transport error.
    pub fail_deploy: Option<u16>,
    pub get_requests_calls: AtomicUsize,
    pub posted_requests: Mutex<Vec<SchedRequest>>,
    pub deploys_started: Mutex<Vec<(String, String)>>,
    pub deleted_requests: Mutex<Vec<String>>,
}

impl FakeScheduler {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            ..Self::default()
        }
    }
}

fn scripted_error(status: u16, what: &str) -> SchedulerError {
    if status == 0 {
        SchedulerError::Transport(format!("scripted transport failure on {what}"))
    } else {
        SchedulerError::Http {
            status,
            message: format!("scripted {status} on {what}"),
        }
    }
}

#[async_trait]
impl SchedulerClient for FakeScheduler {
    async fn get_requests(&self, _use_cache: bool) -> SchedulerResult<Vec<RequestParent>> {
        self.get_requests_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.parents.clone())
    }

    async fn get_deploy(
        &self,
        request_id: &str,
        deploy_id: &str,
    ) -> SchedulerResult<DeployHistory> {
        {
            let mut failures = self.fail_deploy_fetches.lock().unwrap();
            if let Some(remaining) = failures.get_mut(request_id) {
                if *remaining > 0 {
                    if *remaining != ALWAYS {
                        *remaining -= 1;
                    }
                    return Err(SchedulerError::Transport(format!(
                        "scripted failure fetching deploy for {request_id}"
                    )));
                }
            }
        }
        self.deploys
            .get(&(request_id.to_string(), deploy_id.to_string()))
            .cloned()
            .ok_or_else(|| SchedulerError::Http {
                status: 404,
                message: format!("no deploy {deploy_id} for {request_id}"),
            })
    }

    async fn post_request(
        &self,
        deployable: &Deployable,
        request_id: &str,
    ) -> SchedulerResult<()> {
        if let Some(status) = self.fail_post_request {
            return Err(scripted_error(status, "post_request"));
        }
        self.posted_requests
            .lock()
            .unwrap()
            .push(build_request(deployable, request_id));
        Ok(())
    }

    async fn deploy(
        &self,
        _deployable: &Deployable,
        request_id: &str,
        deploy_id: &str,
    ) -> SchedulerResult<()> {
        if let Some(status) = self.fail_deploy {
            return Err(scripted_error(status, "deploy"));
        }
        self.deploys_started
            .lock()
            .unwrap()
            .push((request_id.to_string(), deploy_id.to_string()));
        Ok(())
    }

    async fn delete_request(&self, request_id: &str, _message: &str) -> SchedulerResult<()> {
        self.deleted_requests
            .lock()
            .unwrap()
            .push(request_id.to_string());
        Ok(())
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Factory handing out pre-built fakes by URL.
#[derive(Default)]
pub struct FakeFactory {
    pub clients: HashMap<String, Arc<FakeScheduler>>,
}

impl FakeFactory {
    pub fn with(scheduler: Arc<FakeScheduler>) -> Self {
        let mut clients = HashMap::new();
        clients.insert(scheduler.base_url.clone(), scheduler);
        Self { clients }
    }
}

impl SchedulerClientFactory for FakeFactory {
    fn client(&self, base_url: &str) -> Arc<dyn SchedulerClient> {
        match self.clients.get(base_url) {
            Some(client) => client.clone(),
            None => Arc::new(FakeScheduler::new(base_url)),
        }
    }
}

/// Map-backed artifact registry.
#[derive(Default)]
pub struct FakeRegistry {
    /// image → labels.
    pub labels: HashMap<String, BTreeMap<String, String>>,
    /// canonical source id → artifact.
    pub artifacts: HashMap<String, BuildArtifact>,
}

impl FakeRegistry {
    /// Register an image for a source identity: labels for assembly and
    /// an artifact for resolution.
    pub fn admit(&mut self, source_id: &SourceId, image: &str) {
        self.labels
            .insert(image.to_string(), labels_for(source_id, ""));
        self.artifacts.insert(
            source_id.to_string(),
            BuildArtifact {
                name: image.to_string(),
                qualities: vec![],
            },
        );
    }
}

#[async_trait]
impl ArtifactRegistry for FakeRegistry {
    async fn get_artifact(&self, id: &SourceId) -> Result<BuildArtifact, RegistryError> {
        self.artifacts
            .get(&id.to_string())
            .cloned()
            .ok_or_else(|| RegistryError::NoImageNameFound {
                source_id: id.to_string(),
            })
    }

    async fn image_labels(
        &self,
        image: &str,
    ) -> Result<BTreeMap<String, String>, RegistryError> {
        self.labels
            .get(image)
            .cloned()
            .ok_or_else(|| RegistryError::Backend {
                message: format!("unknown image {image}"),
            })
    }
}

pub fn cluster(name: &str, base_url: &str) -> Arc<Cluster> {
    Arc::new(Cluster {
        name: name.to_string(),
        base_url: base_url.to_string(),
        allowed_advisories: vec![],
        env: BTreeMap::new(),
    })
}

pub fn clusters_of(entries: &[(&str, &str)]) -> Clusters {
    entries
        .iter()
        .map(|(name, url)| (name.to_string(), cluster(name, url)))
        .collect()
}

pub fn source_id(repo: &str, version: &str) -> SourceId {
    SourceId::new(
        SourceLocation::new(repo, ""),
        parse_version(version).unwrap(),
    )
}

/// A request parent with an active deploy marker.
pub fn active_parent(request_id: &str, deploy_id: &str, instances: u32) -> RequestParent {
    RequestParent {
        request: Some(SchedRequest {
            id: request_id.to_string(),
            request_type: Some(RequestType::Service),
            instances: Some(instances),
            owners: vec!["ops@example.com".to_string()],
            schedule: None,
        }),
        request_deploy_state: Some(RequestDeployState {
            pending_deploy: None,
            active_deploy: Some(DeployMarker {
                request_id: request_id.to_string(),
                deploy_id: deploy_id.to_string(),
            }),
        }),
    }
}

/// A deploy history running the given docker image.
pub fn docker_history(image: &str) -> DeployHistory {
    DeployHistory {
        deploy: Some(SchedDeploy {
            id: "dep".to_string(),
            request_id: String::new(),
            env: BTreeMap::new(),
            resources: Some(SchedResources {
                cpus: 0.25,
                memory_mb: 256.0,
                num_ports: 1,
            }),
            container_info: Some(ContainerInfo {
                kind: ContainerType::Docker,
                docker: Some(DockerInfo {
                    image: image.to_string(),
                }),
                volumes: vec![],
            }),
            healthcheck: None,
        }),
    }
}

pub fn intended(repo: &str, version: &str, instances: u32, cluster: &Arc<Cluster>) -> Deployment {
    let mut config = DeployConfig::default();
    config.num_instances = instances;
    config
        .resources
        .insert("cpus".to_string(), "0.25".to_string());
    config
        .resources
        .insert("memory".to_string(), "256".to_string());
    config.resources.insert("ports".to_string(), "1".to_string());
    Deployment {
        source_id: source_id(repo, version),
        flavor: String::new(),
        config,
        kind: DeploymentKind::Service,
        owners: ["ops@example.com".to_string()].into_iter().collect(),
        cluster: Some(cluster.clone()),
        cluster_name: cluster.name.clone(),
    }
}

pub fn deployable_of(deployment: Deployment, status: DeployStatus) -> Deployable {
    Deployable {
        deployment,
        status,
        artifact: None,
    }
}
