//! Name resolution: attach build artifacts to diff pairs and gate on
//! cluster advisory policy.
//!
//! The rectifier never sees an Added/Modified pair without a resolved
//! artifact or an accompanying resolution error; this module is that gate.

use tracing::{debug, info};

use crate::artifact::ArtifactRegistry;
use crate::deployment::Deployment;
use crate::diff::{Deployable, DeployablePair, PairKind};
use crate::resolution::{DiffResolution, ResolutionType, ResolveError};

/// Resolve one pair's image name.
///
/// Same/Removed pairs pass through untouched. Added/Modified pairs get
/// their post-side artifact resolved and advisory-checked; on failure the
/// pair is consumed and a resolution explains why.
pub async fn resolve_pair<R: ArtifactRegistry + ?Sized>(
    registry: &R,
    pair: DeployablePair,
) -> (Option<DeployablePair>, Option<DiffResolution>) {
    match pair.kind() {
        PairKind::Same | PairKind::Removed => (Some(pair), None),
        PairKind::Added | PairKind::Modified => {
            let id = pair.id.clone();
            let Some(post) = pair.post else {
                // Added/Modified implies a post side; a missing one is a
                // diff-engine bug worth surfacing, not deploying around.
                return (
                    None,
                    Some(
                        DiffResolution::new(id, ResolutionType::NotCreated)
                            .with_error(ResolveError::other("pair has no intended side")),
                    ),
                );
            };
            debug!(deployment = %id, "resolving artifact for pair");
            match guard_image(registry, &post.deployment).await {
                Ok(artifact) => {
                    let post = Deployable { artifact, ..post };
                    (
                        Some(DeployablePair {
                            id,
                            prior: pair.prior,
                            post: Some(post),
                            executor_data: pair.executor_data,
                        }),
                        None,
                    )
                }
                Err(error) => {
                    info!(deployment = %id, %error, "unable to resolve artifact");
                    (
                        None,
                        Some(
                            DiffResolution::new(id, ResolutionType::NotCreated)
                                .with_error(error),
                        ),
                    )
                }
            }
        }
    }
}

/// Fetch the artifact for a deployment and enforce the advisory gate.
///
/// Deployments with zero instances imply intentional absence and bypass
/// the lookup entirely.
async fn guard_image<R: ArtifactRegistry + ?Sized>(
    registry: &R,
    deployment: &Deployment,
) -> Result<Option<crate::artifact::BuildArtifact>, ResolveError> {
    if deployment.config.num_instances == 0 {
        info!(deployment = %deployment.id(), "zero instances, skipping artifact check");
        return Ok(None);
    }

    let artifact = registry
        .get_artifact(&deployment.source_id)
        .await
        .map_err(|e| ResolveError::missing_image(&deployment.source_id, e))?;

    let cluster = deployment
        .cluster
        .as_ref()
        .ok_or_else(|| ResolveError::other(format!("nil cluster on deployment {deployment}")))?;

    for quality in &artifact.qualities {
        if !quality.is_advisory() {
            continue;
        }
        if !cluster.allowed_advisories.iter().any(|a| a == &quality.name) {
            return Err(ResolveError::unacceptable_advisory(
                &quality.name,
                &deployment.source_id,
            ));
        }
    }

    Ok(Some(artifact))
}
