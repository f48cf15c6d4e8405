//! Downstream scheduler integration.
//!
//! Talks to each cluster's external scheduler: assembles the actual state
//! of every running deployment, and rectifies diff pairs by creating,
//! modifying, or (policy permitting) deleting scheduler requests.

pub mod assembler;
pub mod builder;
pub mod client;
pub mod dtos;
pub mod error;
pub mod rectify;
pub mod requests;
pub mod resolve;

#[cfg(test)]
pub(crate) mod testutil;

pub use assembler::{
    running_deployments, AssemblerOpts, DEFAULT_REQS_PER_SERVER, MAX_ASSEMBLERS, RETRY_LIMIT,
};
pub use builder::SchedReq;
pub use client::{
    HttpClientFactory, HttpSchedulerClient, SchedulerClient, SchedulerClientFactory,
};
pub use error::{AssembleError, BuildError, SchedulerError, SchedulerResult};
pub use rectify::{changes_dep, changes_req, DeletePolicy, Rectifier};
pub use requests::{
    compute_deploy_id, make_request_id, MAX_DEPLOY_ID_LEN, MAX_REQUEST_ID_LEN,
};
pub use resolve::{Resolver, ResolveReport, SingleRectification};
