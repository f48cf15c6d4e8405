//! Observed deployment state, as assembled from an external scheduler.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::deployment::Deployment;

/// Status of a deployment in an external cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    /// Status unknown or not applicable (e.g. intended deployments).
    #[default]
    Any,
    /// Requested in the cluster, not yet running.
    Pending,
    /// Up and running.
    Active,
    /// The deployment failed.
    Failed,
}

impl fmt::Display for DeployStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeployStatus::Any => "any",
            DeployStatus::Pending => "pending",
            DeployStatus::Active => "active",
            DeployStatus::Failed => "failed",
        };
        write!(f, "{name}")
    }
}

/// Scheduler-specific payload carried alongside an observed deployment.
///
/// A tagged variant per scheduler kind; the rectifier branches on the tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scheduler", rename_all = "snake_case")]
pub enum ExecutorData {
    /// Task-scheduler payload: the executor-side request identity.
    Tasks { request_id: String },
}

impl ExecutorData {
    /// The executor-side request ID, regardless of scheduler kind.
    pub fn request_id(&self) -> &str {
        match self {
            ExecutorData::Tasks { request_id } => request_id,
        }
    }
}

/// A deployment as observed in an external cluster: the deployment value
/// plus its status and executor-side context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployState {
    pub deployment: Deployment,
    #[serde(default)]
    pub status: DeployStatus,
    #[serde(default)]
    pub executor_message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executor_data: Option<ExecutorData>,
    #[serde(default)]
    pub scheduler_url: String,
}

impl DeployState {
    /// Whether this state is terminal; a non-final state implies a
    /// subsequent observation will differ, so pollers should poll again.
    pub fn is_final(&self) -> bool {
        matches!(self.status, DeployStatus::Active | DeployStatus::Failed)
    }

    /// Differences against another state: the deployment diff plus status.
    pub fn diff(&self, other: &DeployState) -> (bool, Vec<String>) {
        let (_, mut diffs) = self.deployment.diff(&other.deployment);
        if self.status != other.status {
            diffs.push(format!(
                "status; this: {}; other: {}",
                self.status, other.status
            ));
        }
        (!diffs.is_empty(), diffs)
    }
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.deployment, self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeployConfig;
    use crate::deployment::DeploymentKind;
    use crate::ids::{parse_version, SourceId, SourceLocation};

    fn state(status: DeployStatus) -> DeployState {
        DeployState {
            deployment: Deployment {
                source_id: SourceId::new(
                    SourceLocation::new("github.com/example/widget", ""),
                    parse_version("1.0.0").unwrap(),
                ),
                flavor: String::new(),
                config: DeployConfig::default(),
                kind: DeploymentKind::Service,
                owners: Default::default(),
                cluster: None,
                cluster_name: "main".to_string(),
            },
            status,
            executor_message: String::new(),
            executor_data: None,
            scheduler_url: "http://sched.main".to_string(),
        }
    }

    #[test]
    fn final_statuses() {
        assert!(state(DeployStatus::Active).is_final());
        assert!(state(DeployStatus::Failed).is_final());
        assert!(!state(DeployStatus::Pending).is_final());
        assert!(!state(DeployStatus::Any).is_final());
    }

    #[test]
    fn diff_includes_status() {
        let a = state(DeployStatus::Active);
        let b = state(DeployStatus::Failed);
        let (changed, diffs) = a.diff(&b);
        assert!(changed);
        assert_eq!(diffs.len(), 1);
        assert!(diffs[0].contains("status"));
    }

    #[test]
    fn executor_data_exposes_request_id() {
        let data = ExecutorData::Tasks {
            request_id: "widget--main-abc".to_string(),
        };
        assert_eq!(data.request_id(), "widget--main-abc");
    }
}
