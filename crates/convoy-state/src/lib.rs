//! Global deployment manifest model and persistence.
//!
//! The GDM is the single source of truth for intent. This crate holds its
//! persisted shape (`State`, `Manifest`, `Defs`), the read/write traits
//! the rest of the control plane consumes, scoped decorators for cluster-
//! and deployment-level access, and a redb-backed store.

pub mod error;
pub mod manager;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use manager::{
    cluster_manager, deployment_manager, ClusterManager, DeploymentManager, StateManager,
    StateReader, StateWriter,
};
pub use store::StateStore;
pub use types::{Defs, DeploySpec, Manifest, State};
