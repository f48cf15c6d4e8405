//! Rectification queue: per-cluster FIFOs of single-deployment
//! rectifications, polled over HTTP until terminal.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use convoy_core::{DeployState, Deployment, DiffResolution};

/// A terminal resolution plus the deploy state observed afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedResolution {
    #[serde(flatten)]
    pub resolution: DiffResolution,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_state: Option<DeployState>,
}

/// Poll response for one queued rectification.
///
/// `queue_position` is the number of entries ahead of this one; negative
/// once the rectification has finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct R11nResponse {
    pub queue_position: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<QueuedResolution>,
}

/// Executes one single-deployment rectification; implemented by the
/// scheduler integration, faked in tests.
#[async_trait]
pub trait SingleRectifier: Send + Sync {
    async fn rectify_single(
        &self,
        deployment: Deployment,
    ) -> (DiffResolution, Option<DeployState>);
}

/// Claim ticket for a queued rectification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueTicket {
    pub queue_id: u64,
    pub cluster: String,
}

enum EntryState {
    Queued,
    Active,
    Done(QueuedResolution),
}

struct Entry {
    cluster: String,
    deployment: Deployment,
    state: EntryState,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    entries: HashMap<u64, Entry>,
    /// Cluster name → FIFO of queued entry ids.
    pending: BTreeMap<String, VecDeque<u64>>,
}

/// Thread-safe rectification queue shared by handlers and the worker.
#[derive(Default)]
pub struct RectifyQueue {
    inner: Mutex<Inner>,
    wakeup: Notify,
}

impl RectifyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a rectification, returning its polling ticket.
    pub fn push(&self, deployment: Deployment) -> QueueTicket {
        let cluster = deployment.cluster_name.clone();
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let queue_id = inner.next_id;
        inner.entries.insert(
            queue_id,
            Entry {
                cluster: cluster.clone(),
                deployment,
                state: EntryState::Queued,
            },
        );
        inner
            .pending
            .entry(cluster.clone())
            .or_default()
            .push_back(queue_id);
        drop(inner);

        debug!(queue_id, %cluster, "rectification queued");
        self.wakeup.notify_one();
        QueueTicket { queue_id, cluster }
    }

    /// The poll response for a ticket, or None for an unknown id.
    pub fn response(&self, queue_id: u64) -> Option<R11nResponse> {
        let inner = self.inner.lock().unwrap();
        let entry = inner.entries.get(&queue_id)?;
        Some(match &entry.state {
            EntryState::Queued => {
                let position = inner
                    .pending
                    .get(&entry.cluster)
                    .and_then(|q| q.iter().position(|id| *id == queue_id))
                    .unwrap_or(0) as i64;
                R11nResponse {
                    queue_position: position,
                    resolution: None,
                }
            }
            EntryState::Active => R11nResponse {
                queue_position: 0,
                resolution: None,
            },
            EntryState::Done(resolution) => R11nResponse {
                queue_position: -1,
                resolution: Some(resolution.clone()),
            },
        })
    }

    /// Pop the next queued job, marking it active.
    fn next_job(&self) -> Option<(u64, Deployment)> {
        let mut inner = self.inner.lock().unwrap();
        let queue_id = inner
            .pending
            .values_mut()
            .find_map(|queue| queue.pop_front())?;
        let entry = inner.entries.get_mut(&queue_id)?;
        entry.state = EntryState::Active;
        Some((queue_id, entry.deployment.clone()))
    }

    fn complete(&self, queue_id: u64, resolution: QueuedResolution) {
        let mut inner = self.inner.lock().unwrap();
        // Guard against completing an entry that was never popped.
        for queue in inner.pending.values_mut() {
            queue.retain(|id| *id != queue_id);
        }
        if let Some(entry) = inner.entries.get_mut(&queue_id) {
            entry.state = EntryState::Done(resolution);
        }
    }

    #[cfg(test)]
    fn depth(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .pending
            .values()
            .map(VecDeque::len)
            .sum()
    }
}

/// Drain the queue until shutdown: one rectification at a time, terminal
/// resolutions recorded for the poll endpoint.
pub async fn run_queue_worker(
    queue: std::sync::Arc<RectifyQueue>,
    rectifier: std::sync::Arc<dyn SingleRectifier>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("rectification queue worker started");
    loop {
        if *shutdown.borrow() {
            break;
        }
        match queue.next_job() {
            Some((queue_id, deployment)) => {
                let id = deployment.id();
                debug!(queue_id, deployment = %id, "rectifying queued deployment");
                let (resolution, deploy_state) =
                    rectifier.rectify_single(deployment).await;
                if let Some(error) = &resolution.error {
                    warn!(queue_id, deployment = %id, %error, "rectification failed");
                }
                queue.complete(
                    queue_id,
                    QueuedResolution {
                        resolution,
                        deploy_state,
                    },
                );
            }
            None => {
                tokio::select! {
                    _ = queue.wakeup.notified() => {}
                    _ = shutdown.changed() => {}
                }
            }
        }
    }
    info!("rectification queue worker stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use convoy_core::{
        parse_version, DeployConfig, DeploymentKind, ResolutionType, SourceId,
        SourceLocation,
    };

    use super::*;

    fn deployment(repo: &str, cluster: &str) -> Deployment {
        Deployment {
            source_id: SourceId::new(
                SourceLocation::new(repo, ""),
                parse_version("1.0.0").unwrap(),
            ),
            flavor: String::new(),
            config: DeployConfig::default(),
            kind: DeploymentKind::Service,
            owners: Default::default(),
            cluster: None,
            cluster_name: cluster.to_string(),
        }
    }

    struct InstantRectifier;

    #[async_trait]
    impl SingleRectifier for InstantRectifier {
        async fn rectify_single(
            &self,
            deployment: Deployment,
        ) -> (DiffResolution, Option<DeployState>) {
            (
                DiffResolution::new(deployment.id(), ResolutionType::Created),
                None,
            )
        }
    }

    #[test]
    fn positions_follow_fifo_order() {
        let queue = RectifyQueue::new();
        let first = queue.push(deployment("github.com/example/a", "main"));
        let second = queue.push(deployment("github.com/example/b", "main"));

        assert_eq!(queue.response(first.queue_id).unwrap().queue_position, 0);
        assert_eq!(queue.response(second.queue_id).unwrap().queue_position, 1);
        assert!(queue.response(999).is_none());
    }

    #[test]
    fn clusters_queue_independently() {
        let queue = RectifyQueue::new();
        queue.push(deployment("github.com/example/a", "left"));
        let right = queue.push(deployment("github.com/example/b", "right"));
        assert_eq!(queue.response(right.queue_id).unwrap().queue_position, 0);
    }

    #[tokio::test]
    async fn worker_drains_to_terminal_resolutions() {
        let queue = Arc::new(RectifyQueue::new());
        let ticket = queue.push(deployment("github.com/example/a", "main"));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let worker = tokio::spawn(run_queue_worker(
            queue.clone(),
            Arc::new(InstantRectifier),
            shutdown_rx,
        ));

        // Wait for the entry to reach a terminal state.
        for _ in 0..100 {
            if queue
                .response(ticket.queue_id)
                .is_some_and(|r| r.queue_position < 0)
            {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let response = queue.response(ticket.queue_id).unwrap();
        assert_eq!(response.queue_position, -1);
        let resolution = response.resolution.unwrap();
        assert_eq!(resolution.resolution.desc, ResolutionType::Created);
        assert_eq!(queue.depth(), 0);

        shutdown_tx.send(true).unwrap();
        worker.await.unwrap();
    }

    #[test]
    fn response_round_trips_as_json() {
        let queue = RectifyQueue::new();
        let dep = deployment("github.com/example/a", "main");
        let id = dep.id();
        let ticket = queue.push(dep);
        queue.complete(
            ticket.queue_id,
            QueuedResolution {
                resolution: DiffResolution::new(id, ResolutionType::Created),
                deploy_state: None,
            },
        );

        let response = queue.response(ticket.queue_id).unwrap();
        let json = serde_json::to_string(&response).unwrap();
        let back: R11nResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(back.queue_position, -1);
        assert_eq!(
            back.resolution.unwrap().resolution.desc,
            ResolutionType::Created
        );
    }
}
