//! Scheduler client: the trait the pipeline consumes and the HTTP
//! implementation against a real scheduler.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use convoy_core::{Deployable, DeploymentKind};

use crate::dtos::{
    ContainerInfo, ContainerType, DeployHistory, DeployRequest, DockerInfo,
    HealthcheckOptions, RequestParent, RequestType, SchedDeploy, SchedRequest,
    SchedResources, SchedVolume,
};
use crate::error::{SchedulerError, SchedulerResult};

/// Abstracts the raw interactions with one cluster's scheduler.
#[async_trait]
pub trait SchedulerClient: Send + Sync {
    /// Enumerate everything the scheduler knows.
    async fn get_requests(&self, use_cache: bool) -> SchedulerResult<Vec<RequestParent>>;

    /// Deploy detail, including container info.
    async fn get_deploy(
        &self,
        request_id: &str,
        deploy_id: &str,
    ) -> SchedulerResult<DeployHistory>;

    /// Create or update a request definition.
    async fn post_request(
        &self,
        deployable: &Deployable,
        request_id: &str,
    ) -> SchedulerResult<()>;

    /// Initiate a deploy against a request.
    async fn deploy(
        &self,
        deployable: &Deployable,
        request_id: &str,
        deploy_id: &str,
    ) -> SchedulerResult<()>;

    /// Delete a request definition.
    async fn delete_request(&self, request_id: &str, message: &str) -> SchedulerResult<()>;

    /// The scheduler base URL this client talks to.
    fn base_url(&self) -> &str;
}

/// Builds clients per cluster URL; the assembler deduplicates URLs before
/// asking.
pub trait SchedulerClientFactory: Send + Sync {
    fn client(&self, base_url: &str) -> Arc<dyn SchedulerClient>;
}

/// Factory producing HTTP clients sharing one connection pool.
pub struct HttpClientFactory {
    http: reqwest::Client,
}

impl HttpClientFactory {
    pub fn new() -> SchedulerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SchedulerError::Transport(e.to_string()))?;
        Ok(Self { http })
    }
}

impl SchedulerClientFactory for HttpClientFactory {
    fn client(&self, base_url: &str) -> Arc<dyn SchedulerClient> {
        Arc::new(HttpSchedulerClient {
            http: self.http.clone(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

/// reqwest-backed scheduler client.
pub struct HttpSchedulerClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSchedulerClient {
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> SchedulerResult<T> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SchedulerError::Transport(e.to_string()))?;
        Self::check(response)
            .await?
            .json()
            .await
            .map_err(|e| SchedulerError::Decode(e.to_string()))
    }

    async fn post_json<B: Serialize>(&self, path: &str, body: &B) -> SchedulerResult<()> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| SchedulerError::Transport(e.to_string()))?;
        Self::check(response).await.map(|_| ())
    }

    async fn check(response: reqwest::Response) -> SchedulerResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(SchedulerError::Http {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl SchedulerClient for HttpSchedulerClient {
    async fn get_requests(&self, use_cache: bool) -> SchedulerResult<Vec<RequestParent>> {
        let path = if use_cache {
            "/api/requests".to_string()
        } else {
            // Skip the scheduler's response cache; assembly wants truth.
            "/api/requests?useWebCache=false".to_string()
        };
        self.get_json(&path).await
    }

    async fn get_deploy(
        &self,
        request_id: &str,
        deploy_id: &str,
    ) -> SchedulerResult<DeployHistory> {
        self.get_json(&format!(
            "/api/history/request/{request_id}/deploy/{deploy_id}"
        ))
        .await
    }

    async fn post_request(
        &self,
        deployable: &Deployable,
        request_id: &str,
    ) -> SchedulerResult<()> {
        let request = build_request(deployable, request_id);
        debug!(%request_id, url = %self.base_url, "posting request definition");
        self.post_json("/api/requests", &request).await
    }

    async fn deploy(
        &self,
        deployable: &Deployable,
        request_id: &str,
        deploy_id: &str,
    ) -> SchedulerResult<()> {
        let deploy = build_deploy(deployable, request_id, deploy_id)?;
        debug!(%request_id, %deploy_id, url = %self.base_url, "posting deploy");
        self.post_json("/api/deploys", &DeployRequest { deploy }).await
    }

    async fn delete_request(&self, request_id: &str, message: &str) -> SchedulerResult<()> {
        let url = format!("{}/api/requests/request/{request_id}", self.base_url);
        let response = self
            .http
            .delete(&url)
            .json(&serde_json::json!({ "message": message }))
            .send()
            .await
            .map_err(|e| SchedulerError::Transport(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            // Deleting something already gone is not a failure.
            return Ok(());
        }
        Self::check(response).await.map(|_| ())
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

/// Render a deployable into the scheduler's request shape.
pub fn build_request(deployable: &Deployable, request_id: &str) -> SchedRequest {
    let deployment = &deployable.deployment;
    SchedRequest {
        id: request_id.to_string(),
        request_type: Some(request_type_for(deployment.kind)),
        instances: Some(deployment.config.num_instances),
        owners: deployment.owners.iter().cloned().collect(),
        schedule: deployment.config.schedule.clone(),
    }
}

/// Render a deployable into a deploy revision.
///
/// Requires a resolved artifact and parseable resource strings; the name
/// resolver guarantees the former for every pair that reaches here.
pub fn build_deploy(
    deployable: &Deployable,
    request_id: &str,
    deploy_id: &str,
) -> SchedulerResult<SchedDeploy> {
    let deployment = &deployable.deployment;
    let artifact = deployable.artifact.as_ref().ok_or_else(|| {
        SchedulerError::InvalidDeploy(format!("no artifact resolved for {}", deployment.id()))
    })?;

    let resources = parse_resources(&deployment.config.resources)?;
    let volumes = deployment
        .config
        .volumes()
        .map(|v| SchedVolume {
            host_path: v.host.clone(),
            container_path: v.container.clone(),
            mode: match v.mode {
                convoy_core::VolumeMode::ReadOnly => "RO".to_string(),
                convoy_core::VolumeMode::ReadWrite => "RW".to_string(),
            },
        })
        .collect();

    Ok(SchedDeploy {
        id: deploy_id.to_string(),
        request_id: request_id.to_string(),
        env: deployment.config.env.clone(),
        resources: Some(resources),
        container_info: Some(ContainerInfo {
            kind: ContainerType::Docker,
            docker: Some(DockerInfo {
                image: artifact.name.clone(),
            }),
            volumes,
        }),
        healthcheck: healthcheck_for(&deployment.config.startup),
    })
}

fn request_type_for(kind: DeploymentKind) -> RequestType {
    match kind {
        DeploymentKind::Service => RequestType::Service,
        DeploymentKind::Worker => RequestType::Worker,
        DeploymentKind::OnDemand => RequestType::OnDemand,
        DeploymentKind::Scheduled => RequestType::Scheduled,
        DeploymentKind::Once => RequestType::RunOnce,
    }
}

fn parse_resources(resources: &BTreeMap<String, String>) -> SchedulerResult<SchedResources> {
    let field = |key: &str| {
        resources
            .get(key)
            .ok_or_else(|| SchedulerError::InvalidDeploy(format!("missing resource {key:?}")))
    };
    let cpus: f64 = field("cpus")?
        .parse()
        .map_err(|_| SchedulerError::InvalidDeploy("cpus is not a number".to_string()))?;
    let memory_mb: f64 = field("memory")?
        .parse()
        .map_err(|_| SchedulerError::InvalidDeploy("memory is not a number".to_string()))?;
    let num_ports: u32 = field("ports")?
        .parse()
        .map_err(|_| SchedulerError::InvalidDeploy("ports is not an integer".to_string()))?;
    Ok(SchedResources {
        cpus,
        memory_mb,
        num_ports,
    })
}

fn healthcheck_for(startup: &convoy_core::Startup) -> Option<HealthcheckOptions> {
    if startup.skip_check {
        return None;
    }
    Some(HealthcheckOptions {
        uri: startup.check_ready_uri_path.clone(),
        protocol: startup.check_ready_protocol.clone(),
        port_index: startup.check_ready_port_index,
        startup_delay_seconds: startup.connect_delay,
        interval_seconds: startup.check_ready_interval,
        max_retries: startup.check_ready_retries,
        failure_status_codes: startup.check_ready_failure_statuses.clone(),
        response_timeout_seconds: startup.check_ready_uri_timeout,
    })
}
