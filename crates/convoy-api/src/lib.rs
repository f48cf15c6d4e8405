//! REST surface for the convoy control plane.
//!
//! Exposes the GDM (snapshot, manifests, deployments) and the
//! single-deployment rectification queue over HTTP, plus the
//! conservative JSON merge clients use for forward-compatible PUTs.

use std::sync::Arc;

use axum::routing::get;
use axum::Router;

use convoy_state::StateManager;

pub mod handlers;
pub mod putback;
pub mod queue;

pub use handlers::{GdmBody, SingleDeploymentBody};
pub use putback::putback_json;
pub use queue::{
    run_queue_worker, QueuedResolution, R11nResponse, RectifyQueue, SingleRectifier,
};

/// Shared handler state.
#[derive(Clone)]
pub struct ApiState {
    pub manager: Arc<dyn StateManager>,
    pub queue: Arc<RectifyQueue>,
}

/// The full API router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/gdm", get(handlers::get_gdm).put(handlers::put_gdm))
        .route(
            "/manifest",
            get(handlers::get_manifest)
                .put(handlers::put_manifest)
                .delete(handlers::delete_manifest),
        )
        .route(
            "/state/deployments",
            get(handlers::get_deployments).put(handlers::put_deployment),
        )
        .route(
            "/single-deployment",
            get(handlers::get_single_deployment).put(handlers::put_single_deployment),
        )
        .route("/deploy-queue-item", get(handlers::get_queue_item))
        .with_state(state)
}
