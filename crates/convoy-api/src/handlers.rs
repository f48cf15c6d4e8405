//! REST handlers over the GDM and the rectification queue.
//!
//! Reads and writes go through `StateManager`; conditional requests use
//! the state etag (`If-Match` / `If-None-Match`), and write conflicts map
//! to 409.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use convoy_core::{Deployment, ManifestId, SourceLocation, User};
use convoy_state::{Manifest, State as GdmState, StateError, StateReader, StateWriter};

use crate::ApiState;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorBody {
            error: message.into(),
        }),
    )
        .into_response()
}

fn state_error(err: StateError) -> Response {
    let status = match &err {
        StateError::Conflict { .. } => StatusCode::CONFLICT,
        StateError::NoSuchDeployment(_) => StatusCode::NOT_FOUND,
        StateError::UnknownCluster(_) | StateError::Invalid(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response(status, err.to_string())
}

/// The user a request acts as; header-supplied, defaulting to anonymous.
fn request_user(headers: &HeaderMap) -> User {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    User {
        name: get("x-convoy-user-name"),
        email: get("x-convoy-user-email"),
    }
}

/// `If-Match` precondition against the current state etag.
fn precondition_met(headers: &HeaderMap, state: &GdmState) -> bool {
    match headers.get(header::IF_MATCH).and_then(|v| v.to_str().ok()) {
        None => true,
        Some(expected) => {
            let expected = expected.trim_matches('"');
            state.etag.as_deref() == Some(expected)
        }
    }
}

fn etag_header(state: &GdmState) -> [(header::HeaderName, String); 1] {
    [(header::ETAG, state.etag.clone().unwrap_or_default())]
}

// ── GDM ────────────────────────────────────────────────────────────

/// Full deployment snapshot.
#[derive(Debug, Serialize, Deserialize)]
pub struct GdmBody {
    pub deployments: Vec<Deployment>,
}

/// GET /gdm
pub async fn get_gdm(State(api): State<ApiState>) -> Response {
    let state = match api.manager.read_state() {
        Ok(state) => state,
        Err(e) => return state_error(e),
    };
    let deployments = match state.deployments() {
        Ok(deps) => deps.into_values().collect(),
        Err(e) => return state_error(e),
    };
    (etag_header(&state), Json(GdmBody { deployments })).into_response()
}

/// PUT /gdm — conditional full replace of the deployment set.
///
/// The submitted snapshot is authoritative: manifests are rebuilt from
/// it, so deployments absent from the body are removed.
pub async fn put_gdm(
    State(api): State<ApiState>,
    headers: HeaderMap,
    Json(body): Json<GdmBody>,
) -> Response {
    let current = match api.manager.read_state() {
        Ok(state) => state,
        Err(e) => return state_error(e),
    };
    if !precondition_met(&headers, &current) {
        return error_response(StatusCode::PRECONDITION_FAILED, "state has changed");
    }

    let mut replacement = GdmState {
        defs: current.defs.clone(),
        etag: current.etag.clone(),
        ..GdmState::default()
    };
    if let Err(e) = replacement.update_deployments(body.deployments) {
        return state_error(e);
    }
    if let Err(e) = api.manager.write_state(&replacement, &request_user(&headers)) {
        return state_error(e);
    }
    info!("gdm replaced");
    StatusCode::NO_CONTENT.into_response()
}

// ── Manifests ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ManifestQuery {
    pub repo: String,
    #[serde(default)]
    pub offset: String,
    #[serde(default)]
    pub flavor: String,
}

impl ManifestQuery {
    fn id(&self) -> ManifestId {
        ManifestId::new(
            SourceLocation::new(self.repo.clone(), self.offset.clone()),
            self.flavor.clone(),
        )
    }
}

/// GET /manifest?repo=…&offset=…&flavor=…
pub async fn get_manifest(
    State(api): State<ApiState>,
    Query(query): Query<ManifestQuery>,
) -> Response {
    let state = match api.manager.read_state() {
        Ok(state) => state,
        Err(e) => return state_error(e),
    };
    match state.get_manifest(&query.id()) {
        Some(manifest) => (etag_header(&state), Json(manifest.clone())).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "no such manifest"),
    }
}

/// PUT /manifest — validate, repair, store.
pub async fn put_manifest(
    State(api): State<ApiState>,
    headers: HeaderMap,
    Json(mut manifest): Json<Manifest>,
) -> Response {
    let remaining = manifest.repair();
    if !remaining.is_empty() {
        let flaws: Vec<String> = remaining.iter().map(|f| f.to_string()).collect();
        return error_response(
            StatusCode::BAD_REQUEST,
            format!("invalid manifest: {}", flaws.join("; ")),
        );
    }

    let mut state = match api.manager.read_state() {
        Ok(state) => state,
        Err(e) => return state_error(e),
    };
    if !precondition_met(&headers, &state) {
        return error_response(StatusCode::PRECONDITION_FAILED, "state has changed");
    }
    debug!(manifest = %manifest.id(), "storing manifest");
    state.set_manifest(manifest);
    if let Err(e) = api.manager.write_state(&state, &request_user(&headers)) {
        return state_error(e);
    }
    StatusCode::NO_CONTENT.into_response()
}

/// DELETE /manifest?repo=…
pub async fn delete_manifest(
    State(api): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<ManifestQuery>,
) -> Response {
    let mut state = match api.manager.read_state() {
        Ok(state) => state,
        Err(e) => return state_error(e),
    };
    if !state.remove_manifest(&query.id()) {
        return error_response(StatusCode::NOT_FOUND, "no such manifest");
    }
    if let Err(e) = api.manager.write_state(&state, &request_user(&headers)) {
        return state_error(e);
    }
    StatusCode::NO_CONTENT.into_response()
}

// ── Deployments ────────────────────────────────────────────────────

/// GET /state/deployments
pub async fn get_deployments(State(api): State<ApiState>) -> Response {
    let state = match api.manager.read_state() {
        Ok(state) => state,
        Err(e) => return state_error(e),
    };
    match state.deployments() {
        Ok(deps) => {
            let list: Vec<Deployment> = deps.into_values().collect();
            (etag_header(&state), Json(list)).into_response()
        }
        Err(e) => state_error(e),
    }
}

/// PUT /state/deployments — upsert one deployment; `If-None-Match: *`
/// rejects creation over an existing resource.
pub async fn put_deployment(
    State(api): State<ApiState>,
    headers: HeaderMap,
    Json(deployment): Json<Deployment>,
) -> Response {
    let mut state = match api.manager.read_state() {
        Ok(state) => state,
        Err(e) => return state_error(e),
    };
    if !precondition_met(&headers, &state) {
        return error_response(StatusCode::PRECONDITION_FAILED, "state has changed");
    }

    let id = deployment.id();
    let exists = match state.deployments() {
        Ok(deps) => deps.get(&id).is_some(),
        Err(e) => return state_error(e),
    };
    let create_only = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        == Some("*");
    if create_only && exists {
        return error_response(StatusCode::CONFLICT, format!("{id} already exists"));
    }

    if let Err(e) = state.update_deployments([deployment]) {
        return state_error(e);
    }
    if let Err(e) = api.manager.write_state(&state, &request_user(&headers)) {
        return state_error(e);
    }
    if exists {
        StatusCode::NO_CONTENT.into_response()
    } else {
        StatusCode::CREATED.into_response()
    }
}

// ── Single deployment + rectification queue ────────────────────────

#[derive(Debug, Deserialize)]
pub struct SingleDeploymentQuery {
    pub repo: String,
    #[serde(default)]
    pub offset: String,
    #[serde(default)]
    pub flavor: String,
    pub cluster: String,
}

/// Body of GET/PUT /single-deployment.
#[derive(Debug, Serialize, Deserialize)]
pub struct SingleDeploymentBody {
    pub deployment: Deployment,
}

/// GET /single-deployment?repo=…&cluster=…
pub async fn get_single_deployment(
    State(api): State<ApiState>,
    Query(query): Query<SingleDeploymentQuery>,
) -> Response {
    let state = match api.manager.read_state() {
        Ok(state) => state,
        Err(e) => return state_error(e),
    };
    let id = convoy_core::DeploymentId::new(
        ManifestId::new(
            SourceLocation::new(query.repo.clone(), query.offset.clone()),
            query.flavor.clone(),
        ),
        query.cluster.clone(),
    );
    let deployment = match state.deployments() {
        Ok(deps) => deps.get(&id).cloned(),
        Err(e) => return state_error(e),
    };
    match deployment {
        Some(deployment) => (
            etag_header(&state),
            Json(SingleDeploymentBody { deployment }),
        )
            .into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("no deployment {id}")),
    }
}

/// PUT /single-deployment — update the GDM and enqueue rectification;
/// the response's Location header is the polling target.
pub async fn put_single_deployment(
    State(api): State<ApiState>,
    Query(query): Query<SingleDeploymentQuery>,
    headers: HeaderMap,
    Json(body): Json<SingleDeploymentBody>,
) -> Response {
    let mut deployment = body.deployment;
    deployment.cluster_name = query.cluster.clone();

    let mut state = match api.manager.read_state() {
        Ok(state) => state,
        Err(e) => return state_error(e),
    };
    if !precondition_met(&headers, &state) {
        return error_response(StatusCode::PRECONDITION_FAILED, "state has changed");
    }
    if let Err(e) = state.update_deployments([deployment.clone()]) {
        return state_error(e);
    }
    if let Err(e) = api.manager.write_state(&state, &request_user(&headers)) {
        return state_error(e);
    }

    let ticket = api.queue.push(deployment);
    info!(queue_id = ticket.queue_id, cluster = %ticket.cluster, "rectification enqueued");
    let location = format!(
        "/deploy-queue-item?cluster={}&queue_id={}",
        ticket.cluster, ticket.queue_id
    );
    (
        StatusCode::CREATED,
        [(header::LOCATION, location)],
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct QueueItemQuery {
    pub queue_id: u64,
}

/// GET /deploy-queue-item?cluster=…&queue_id=…
pub async fn get_queue_item(
    State(api): State<ApiState>,
    Query(query): Query<QueueItemQuery>,
) -> Response {
    match api.queue.response(query.queue_id) {
        Some(response) => Json(response).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "no such queued rectification"),
    }
}
