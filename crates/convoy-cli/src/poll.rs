//! Poll a queued rectification until it reaches a terminal status.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::time::Instant;
use tracing::info;

use convoy_api::R11nResponse;
use convoy_core::DeployStatus;

use crate::client::ApiClient;

/// How long to wait between polls.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Emit a progress line every this many attempts.
const PROGRESS_EVERY: u32 = 10;

/// Fetches one poll response; the HTTP client in production, scripted in
/// tests.
#[async_trait]
pub trait R11nFetch {
    async fn fetch(&self, location: &str) -> Result<R11nResponse>;
}

#[async_trait]
impl R11nFetch for ApiClient {
    async fn fetch(&self, location: &str) -> Result<R11nResponse> {
        self.get_json(location).await
    }
}

/// Terminal outcome of a deploy poll.
#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome {
    Success {
        deployment_id: String,
        elapsed: Duration,
    },
    Failed {
        reason: String,
        elapsed: Duration,
    },
}

impl PollOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PollOutcome::Success { .. })
    }
}

/// Poll `location` until the rectification resolves, the resolution
/// carries an error, or the attempt budget runs out.
///
/// No cancellation token is threaded; the attempt budget is the caller's
/// wall-clock deadline.
pub async fn poll_deploy_queue(
    fetch: &dyn R11nFetch,
    location: &str,
    attempts: u32,
) -> PollOutcome {
    let start = Instant::now();

    for attempt in 0..attempts {
        let response = match fetch.fetch(location).await {
            Ok(response) => response,
            Err(e) => {
                return PollOutcome::Failed {
                    reason: format!("failed to poll {location}: {e}"),
                    elapsed: start.elapsed(),
                }
            }
        };

        if attempt % PROGRESS_EVERY == 0 {
            info!(
                %location,
                attempt,
                elapsed = ?start.elapsed(),
                queue_position = response.queue_position,
                "waiting for rectification"
            );
        }

        if let Some(resolution) = &response.resolution {
            if let Some(error) = &resolution.resolution.error {
                return PollOutcome::Failed {
                    reason: error.to_string(),
                    elapsed: start.elapsed(),
                };
            }

            if response.queue_position < 0 {
                if let Some(state) = &resolution.deploy_state {
                    if resolution.resolution.desc.is_finished() {
                        if state.status == DeployStatus::Active {
                            return PollOutcome::Success {
                                deployment_id: resolution.resolution.deployment_id.to_string(),
                                elapsed: start.elapsed(),
                            };
                        }
                        return PollOutcome::Failed {
                            reason: format!(
                                "deployment {} finished {}",
                                resolution.resolution.deployment_id, state.status
                            ),
                            elapsed: start.elapsed(),
                        };
                    }
                }
            }
        }

        tokio::time::sleep(POLL_INTERVAL).await;
    }

    PollOutcome::Failed {
        reason: format!("gave up after {attempts} attempts"),
        elapsed: start.elapsed(),
    }
}
