//! Scheduler integration error types.

use thiserror::Error;

/// Errors talking to a downstream scheduler.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The scheduler answered with a non-success status.
    #[error("scheduler returned {status}: {message}")]
    Http { status: u16, message: String },

    /// The request never completed (connect, timeout, body).
    #[error("scheduler transport: {0}")]
    Transport(String),

    /// The response body didn't decode.
    #[error("scheduler response decode: {0}")]
    Decode(String),

    /// The deployable can't be rendered into a scheduler payload.
    #[error("invalid deploy: {0}")]
    InvalidDeploy(String),
}

impl SchedulerError {
    /// Whether this is a downstream 4xx — surfaced raw rather than
    /// wrapped, since retrying or snapshotting won't help the caller.
    pub fn is_client_error(&self) -> bool {
        matches!(self, SchedulerError::Http { status, .. } if (400..500).contains(status))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            SchedulerError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// Why one request's deploy-state assembly did not produce a state.
#[derive(Debug, Error)]
pub enum BuildError {
    /// Syntactically valid response missing fields required to proceed.
    /// Never retried.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The request isn't something this control plane owns; consumed
    /// silently.
    #[error("not ours: {0}")]
    Ignorable(String),

    /// The underlying client call failed; retryable when the request
    /// identity is intact.
    #[error("client call failed: {0}")]
    Client(#[from] SchedulerError),
}

/// Pipeline-level assembly failure.
#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("listing requests from {url}: {source}")]
    Cluster {
        url: String,
        #[source]
        source: SchedulerError,
    },

    #[error("assembling {request_id} from {url} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        url: String,
        request_id: String,
        attempts: u32,
        #[source]
        source: BuildError,
    },

    #[error("assembling {request_id} from {url}: {source}")]
    Request {
        url: String,
        request_id: String,
        #[source]
        source: BuildError,
    },

    #[error("assembly pipeline: {0}")]
    Pipeline(String),
}
