//! Actual-state assembly: collect every running deployment across N
//! clusters into normalized deploy states.
//!
//! One lister task per deduplicated scheduler URL feeds discovered
//! requests through a single accounting loop into a semaphore-bounded
//! worker pool. Workers classify their failures; retryable ones are
//! re-enqueued after a short delay with a per-identity budget, malformed
//! and ignorable ones are dropped, anything else aborts the pipeline.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use convoy_core::{ArtifactRegistry, Clusters, DeployState, DeployStates};

use crate::builder::{build_deploy_state, SchedReq};
use crate::client::SchedulerClientFactory;
use crate::error::{AssembleError, BuildError};

/// Maximum number of simultaneous deployment assemblers.
pub const MAX_ASSEMBLERS: usize = 100;

/// Default maximum concurrent HTTP requests per scheduler server.
pub const DEFAULT_REQS_PER_SERVER: usize = 10;

/// Retries allowed per `{url, request_id}` before the failure is fatal.
pub const RETRY_LIMIT: u32 = 3;

/// Tuning for the assembly pipeline.
#[derive(Debug, Clone)]
pub struct AssemblerOpts {
    pub max_assemblers: usize,
    pub reqs_per_server: usize,
    pub retry_limit: u32,
    pub retry_delay: Duration,
}

impl Default for AssemblerOpts {
    fn default() -> Self {
        Self {
            max_assemblers: MAX_ASSEMBLERS,
            reqs_per_server: DEFAULT_REQS_PER_SERVER,
            retry_limit: RETRY_LIMIT,
            retry_delay: Duration::from_millis(50),
        }
    }
}

/// Per-identity retry accounting.
///
/// Each failure is recorded first, then judged: once the count passes the
/// limit the request is no longer retryable.
pub(crate) struct RetryCounter {
    counts: HashMap<String, u32>,
    limit: u32,
}

impl RetryCounter {
    pub(crate) fn new(limit: u32) -> Self {
        Self {
            counts: HashMap::new(),
            limit,
        }
    }

    /// Record a failure for this identity; returns the running count and
    /// whether another retry is allowed.
    pub(crate) fn record(&mut self, identity: &str) -> (u32, bool) {
        let count = self.counts.entry(identity.to_string()).or_insert(0);
        *count += 1;
        (*count, *count <= self.limit)
    }
}

enum Outcome {
    Discovered(SchedReq),
    Assembled(Box<DeployState>),
    Dropped { identity: String, error: BuildError },
    Failed { req: SchedReq, error: BuildError },
}

/// Collect data from every cluster's scheduler and return the set of
/// actual deployments.
pub async fn running_deployments(
    factory: Arc<dyn SchedulerClientFactory>,
    registry: Arc<dyn ArtifactRegistry>,
    clusters: &Clusters,
    opts: AssemblerOpts,
) -> Result<DeployStates, AssembleError> {
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outcome>();
    let capacity = (opts.reqs_per_server * clusters.len().max(1)).max(1);
    let (req_tx, req_rx) = mpsc::channel::<SchedReq>(capacity);

    // One lister per unique scheduler URL.
    let mut listers: JoinSet<Result<(), AssembleError>> = JoinSet::new();
    let mut seen = HashSet::new();
    for cluster in clusters.values() {
        let url = cluster.base_url.clone();
        if !seen.insert(url.clone()) {
            continue;
        }
        let client = factory.client(&url);
        let out = out_tx.clone();
        listers.spawn(async move {
            debug!(%url, "listing scheduler requests");
            let parents = client.get_requests(false).await.map_err(|source| {
                AssembleError::Cluster {
                    url: url.clone(),
                    source,
                }
            })?;
            debug!(%url, count = parents.len(), "requests listed");
            for parent in parents {
                let _ = out.send(Outcome::Discovered(SchedReq {
                    source_url: url.clone(),
                    client: client.clone(),
                    parent,
                }));
            }
            Ok(())
        });
    }

    // Effective worker cap: never more than the per-server budget allows.
    let pool = opts
        .max_assemblers
        .min(opts.reqs_per_server * clusters.len().max(1))
        .max(1);
    let dispatcher = tokio::spawn(dispatch(
        req_rx,
        out_tx.clone(),
        Arc::new(Semaphore::new(pool)),
        registry,
        clusters.clone(),
    ));
    drop(out_tx);

    let mut retries = RetryCounter::new(opts.retry_limit);
    let mut open_listers = listers.len();
    let mut outstanding: usize = 0;
    let mut states = DeployStates::new();
    let mut failure: Option<AssembleError> = None;

    while failure.is_none() && (open_listers > 0 || outstanding > 0) {
        tokio::select! {
            Some(joined) = listers.join_next(), if open_listers > 0 => {
                open_listers -= 1;
                match joined {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => failure = Some(e),
                    Err(e) => {
                        failure = Some(AssembleError::Pipeline(format!(
                            "cluster lister died: {e}"
                        )));
                    }
                }
            }
            Some(outcome) = out_rx.recv() => match outcome {
                Outcome::Discovered(req) => {
                    outstanding += 1;
                    if req_tx.send(req).await.is_err() {
                        failure = Some(AssembleError::Pipeline(
                            "dispatcher stopped early".to_string(),
                        ));
                    }
                }
                Outcome::Assembled(state) => {
                    outstanding -= 1;
                    debug!(deployment = %state.deployment.id(), "adding deployment");
                    states.set(*state);
                }
                Outcome::Dropped { identity, error } => {
                    outstanding -= 1;
                    match &error {
                        BuildError::Ignorable(reason) => {
                            debug!(%identity, %reason, "ignorable request")
                        }
                        other => warn!(%identity, error = %other, "dropping request"),
                    }
                }
                Outcome::Failed { req, error } => match req.identity() {
                    Some(identity) => {
                        let (count, retryable) = retries.record(&identity);
                        if retryable {
                            debug!(%identity, attempt = count, "requeueing request");
                            let tx = req_tx.clone();
                            let delay = opts.retry_delay;
                            tokio::spawn(async move {
                                tokio::time::sleep(delay).await;
                                let _ = tx.send(req).await;
                            });
                        } else {
                            failure = Some(AssembleError::RetriesExhausted {
                                url: req.source_url.clone(),
                                request_id: req
                                    .parent
                                    .request
                                    .as_ref()
                                    .map(|r| r.id.clone())
                                    .unwrap_or_default(),
                                attempts: count,
                                source: error,
                            });
                        }
                    }
                    // A single absent identity field makes the error
                    // non-retryable.
                    None => {
                        failure = Some(AssembleError::Request {
                            url: req.source_url.clone(),
                            request_id: req
                                .parent
                                .request
                                .as_ref()
                                .map(|r| r.id.clone())
                                .unwrap_or_default(),
                            source: error,
                        });
                    }
                },
            },
            else => break,
        }
    }

    if failure.is_none() && outstanding > 0 {
        failure = Some(AssembleError::Pipeline(format!(
            "{outstanding} requests never produced an outcome"
        )));
    }

    // Tear down: closing the request channel ends the dispatcher, which
    // joins its remaining workers.
    drop(req_tx);
    listers.abort_all();
    let _ = dispatcher.await;

    match failure {
        None => {
            info!(count = states.len(), "actual state assembled");
            Ok(states)
        }
        Some(error) => {
            warn!(assembled = states.len(), error = %error, "assembly aborted");
            Err(error)
        }
    }
}

/// Bounded fan-out of assembly workers.
///
/// A panicking worker is reported as a dropped request rather than
/// killing the pipeline; the supervisor keeps the accounting straight.
async fn dispatch(
    mut req_rx: mpsc::Receiver<SchedReq>,
    out_tx: mpsc::UnboundedSender<Outcome>,
    semaphore: Arc<Semaphore>,
    registry: Arc<dyn ArtifactRegistry>,
    clusters: Clusters,
) {
    let mut workers = JoinSet::new();
    while let Some(req) = req_rx.recv().await {
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let out = out_tx.clone();
        let registry = registry.clone();
        let clusters = clusters.clone();
        workers.spawn(async move {
            let _permit = permit;
            let outcome = match build_deploy_state(registry.as_ref(), &clusters, &req).await {
                Ok(state) => Outcome::Assembled(Box::new(state)),
                Err(error @ (BuildError::Malformed(_) | BuildError::Ignorable(_))) => {
                    Outcome::Dropped {
                        identity: req.identity().unwrap_or_else(|| req.source_url.clone()),
                        error,
                    }
                }
                Err(error) => Outcome::Failed { req, error },
            };
            let _ = out.send(outcome);
        });
        while let Some(joined) = workers.try_join_next() {
            report_dead_worker(joined, &out_tx);
        }
    }
    while let Some(joined) = workers.join_next().await {
        report_dead_worker(joined, &out_tx);
    }
}

/// A worker that died still owes the accounting loop one outcome.
fn report_dead_worker(
    joined: Result<(), tokio::task::JoinError>,
    out_tx: &mpsc::UnboundedSender<Outcome>,
) {
    if let Err(e) = joined {
        let _ = out_tx.send(Outcome::Dropped {
            identity: "<assembly worker>".to_string(),
            error: BuildError::Malformed(format!("assembly worker died: {e}")),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requests::make_request_id;
    use crate::testutil::{
        active_parent, clusters_of, docker_history, source_id, FakeFactory, FakeRegistry,
        FakeScheduler, ALWAYS,
    };
    use convoy_core::{DeploymentId, ManifestId};

    const URL: &str = "http://sched.main";

    fn quick_opts() -> AssemblerOpts {
        AssemblerOpts {
            retry_delay: Duration::from_millis(1),
            ..AssemblerOpts::default()
        }
    }

    fn one_service_scheduler() -> (Arc<FakeScheduler>, FakeRegistry) {
        let mut sched = FakeScheduler::new(URL);
        sched.parents = vec![active_parent("req-widget", "dep-1", 2)];
        sched.deploys.insert(
            ("req-widget".to_string(), "dep-1".to_string()),
            docker_history("img:widget"),
        );
        let mut registry = FakeRegistry::default();
        registry.admit(&source_id("github.com/example/widget", "1.2.0"), "img:widget");
        (Arc::new(sched), registry)
    }

    #[test]
    fn retry_counter_allows_limit_then_stops() {
        let mut retries = RetryCounter::new(3);
        assert_eq!(retries.record("u:r"), (1, true));
        assert_eq!(retries.record("u:r"), (2, true));
        assert_eq!(retries.record("u:r"), (3, true));
        // Fourth failure exceeds the budget; counter reads limit + 1.
        assert_eq!(retries.record("u:r"), (4, false));
        // Other identities are unaffected.
        assert_eq!(retries.record("u:other"), (1, true));
    }

    #[tokio::test]
    async fn assembles_across_the_pipeline() {
        let (sched, registry) = one_service_scheduler();
        let clusters = clusters_of(&[("main", URL)]);

        let states = running_deployments(
            Arc::new(FakeFactory::with(sched)),
            Arc::new(registry),
            &clusters,
            quick_opts(),
        )
        .await
        .unwrap();

        assert_eq!(states.len(), 1);
        let (_, state) = states.iter().next().unwrap();
        assert_eq!(state.deployment.cluster_name, "main");
        assert_eq!(state.deployment.config.num_instances, 2);
    }

    #[tokio::test]
    async fn empty_cluster_set_yields_nothing() {
        let states = running_deployments(
            Arc::new(FakeFactory::default()),
            Arc::new(FakeRegistry::default()),
            &Clusters::new(),
            quick_opts(),
        )
        .await
        .unwrap();
        assert!(states.is_empty());
    }

    #[tokio::test]
    async fn duplicate_urls_are_queried_once() {
        // Two nicknames alias the same scheduler; hypothetical request
        // IDs pick the right one.
        let clusters = clusters_of(&[("alpha", URL), ("beta", URL)]);
        let dep_id = DeploymentId::new(
            ManifestId::new(source_id("github.com/example/widget", "1.2.0").location, ""),
            "alpha",
        );
        let req_id = make_request_id(&dep_id).unwrap();
        let mut registry = FakeRegistry::default();
        registry.admit(&source_id("github.com/example/widget", "1.2.0"), "img:widget");
        let mut sched_inner = FakeScheduler::new(URL);
        sched_inner.parents = vec![active_parent(&req_id, "dep-1", 2)];
        sched_inner.deploys.insert(
            (req_id.clone(), "dep-1".to_string()),
            docker_history("img:widget"),
        );
        let sched = Arc::new(sched_inner);

        let states = running_deployments(
            Arc::new(FakeFactory::with(sched.clone())),
            Arc::new(registry),
            &clusters,
            quick_opts(),
        )
        .await
        .unwrap();

        assert_eq!(sched.get_requests_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(states.len(), 1);
        assert_eq!(states.iter().next().unwrap().1.deployment.cluster_name, "alpha");
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failures_recover_within_budget() {
        let (sched, registry) = one_service_scheduler();
        sched
            .fail_deploy_fetches
            .lock()
            .unwrap()
            .insert("req-widget".to_string(), 2);
        let clusters = clusters_of(&[("main", URL)]);

        let states = running_deployments(
            Arc::new(FakeFactory::with(sched)),
            Arc::new(registry),
            &clusters,
            quick_opts(),
        )
        .await
        .unwrap();
        assert_eq!(states.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_retries_are_fatal() {
        let (sched, registry) = one_service_scheduler();
        sched
            .fail_deploy_fetches
            .lock()
            .unwrap()
            .insert("req-widget".to_string(), ALWAYS);
        let clusters = clusters_of(&[("main", URL)]);

        let err = running_deployments(
            Arc::new(FakeFactory::with(sched)),
            Arc::new(registry),
            &clusters,
            quick_opts(),
        )
        .await
        .unwrap_err();

        match err {
            AssembleError::RetriesExhausted {
                request_id,
                attempts,
                ..
            } => {
                assert_eq!(request_id, "req-widget");
                // Initial failure plus retry_limit retries.
                assert_eq!(attempts, RETRY_LIMIT + 1);
            }
            other => panic!("expected RetriesExhausted, got {other}"),
        }
    }

    #[tokio::test]
    async fn malformed_responses_are_dropped_not_fatal() {
        let (sched, registry) = one_service_scheduler();
        let mut broken = active_parent("req-broken", "dep-x", 1);
        broken.request_deploy_state = None;
        let mut inner = FakeScheduler::new(URL);
        inner.parents = vec![sched.parents[0].clone(), broken];
        inner.deploys = sched.deploys.clone();
        let clusters = clusters_of(&[("main", URL)]);

        let states = running_deployments(
            Arc::new(FakeFactory::with(Arc::new(inner))),
            Arc::new(registry),
            &clusters,
            quick_opts(),
        )
        .await
        .unwrap();

        // The malformed request is dropped; the healthy one survives.
        assert_eq!(states.len(), 1);
    }

    #[tokio::test]
    async fn unowned_requests_are_consumed_silently() {
        let mut sched = FakeScheduler::new(URL);
        let mut parent = active_parent("req-foreign", "dep-1", 1);
        parent.request.as_mut().unwrap().request_type = None;
        sched.parents = vec![parent];
        sched.deploys.insert(
            ("req-foreign".to_string(), "dep-1".to_string()),
            docker_history("img:foreign"),
        );
        let mut registry = FakeRegistry::default();
        registry.admit(&source_id("github.com/example/foreign", "0.1.0"), "img:foreign");
        let clusters = clusters_of(&[("main", URL)]);

        let states = running_deployments(
            Arc::new(FakeFactory::with(Arc::new(sched))),
            Arc::new(registry),
            &clusters,
            quick_opts(),
        )
        .await
        .unwrap();
        assert!(states.is_empty());
    }
}
