//! Wire model of the downstream scheduler.
//!
//! The scheduler's two-level abstraction: a long-lived *request* (the
//! shape: type, instance count, owners) and point-in-time *deploys*
//! against it (image, resources, env). Fields external code may omit are
//! optional here; the builder decides which absences are malformed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How the scheduler runs a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestType {
    Service,
    Worker,
    OnDemand,
    Scheduled,
    RunOnce,
    /// Anything this control plane doesn't manage.
    #[serde(other)]
    Unrecognized,
}

/// The long-lived request definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedRequest {
    pub id: String,
    pub request_type: Option<RequestType>,
    pub instances: Option<u32>,
    pub owners: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
}

/// Pointer to one deploy of one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeployMarker {
    pub request_id: String,
    pub deploy_id: String,
}

/// The scheduler's view of which deploy is pending/active for a request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestDeployState {
    pub pending_deploy: Option<DeployMarker>,
    pub active_deploy: Option<DeployMarker>,
}

/// One request as enumerated by `GET /api/requests`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RequestParent {
    pub request: Option<SchedRequest>,
    pub request_deploy_state: Option<RequestDeployState>,
}

/// Container technology backing a deploy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerType {
    Docker,
    Mesos,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DockerInfo {
    pub image: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedVolume {
    pub host_path: String,
    pub container_path: String,
    pub mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerInfo {
    #[serde(rename = "type")]
    pub kind: ContainerType,
    #[serde(default)]
    pub docker: Option<DockerInfo>,
    #[serde(default)]
    pub volumes: Vec<SchedVolume>,
}

/// Per-instance resource allocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedResources {
    pub cpus: f64,
    pub memory_mb: f64,
    pub num_ports: u32,
}

/// Readiness checking options sent with a deploy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HealthcheckOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_delay_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failure_status_codes: Vec<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_timeout_seconds: Option<u32>,
}

/// One deploy revision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchedDeploy {
    pub id: String,
    pub request_id: String,
    pub env: BTreeMap<String, String>,
    pub resources: Option<SchedResources>,
    pub container_info: Option<ContainerInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub healthcheck: Option<HealthcheckOptions>,
}

/// Deploy detail returned by `GET /api/history/...`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DeployHistory {
    pub deploy: Option<SchedDeploy>,
}

/// Body of `POST /api/deploys`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployRequest {
    pub deploy: SchedDeploy,
}
