//! Derivation of scheduler request and deploy identifiers.
//!
//! The downstream scheduler caps request IDs at 99 characters and deploy
//! IDs at 49, and restricts the character set; these helpers sanitize and
//! truncate accordingly.

use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use convoy_core::{format_version, DeploymentId, IdError, SourceId};

/// Scheduler request IDs must be under 100 characters.
pub const MAX_REQUEST_ID_LEN: usize = 99;

/// Scheduler deploy IDs must be under 50 characters.
pub const MAX_DEPLOY_ID_LEN: usize = 49;

/// Room left for the version segment of a deploy ID, accounting for the
/// separator before the UUID segment.
const MAX_VERSION_LEN: usize = 31;

static ILLEGAL_ID_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^a-zA-Z0-9_]").expect("static pattern"));

/// Replace every illegal identifier character with `_`.
pub fn sanitize(input: &str) -> String {
    ILLEGAL_ID_CHARS.replace_all(input, "_").into_owned()
}

/// Remove every illegal identifier character.
pub fn strip(input: &str) -> String {
    ILLEGAL_ID_CHARS.replace_all(input, "").into_owned()
}

fn truncate(input: String, max: usize) -> String {
    if input.len() > max {
        input[..max].to_string()
    } else {
        input
    }
}

/// Derive the scheduler request ID for a deployment identity.
///
/// `shortname-dir-flavor-cluster-digest`, each segment sanitized, the
/// whole truncated to [`MAX_REQUEST_ID_LEN`].
pub fn make_request_id(dep_id: &DeploymentId) -> Result<String, IdError> {
    let short_name = sanitize(dep_id.manifest_id.source.short_name()?);
    let dir = sanitize(&dep_id.manifest_id.source.dir);
    let flavor = sanitize(&dep_id.manifest_id.flavor);
    let cluster = sanitize(&dep_id.cluster);
    let digest = dep_id.digest();

    let base = format!("{short_name}-{dir}-{flavor}-{cluster}-{digest}");
    Ok(truncate(base, MAX_REQUEST_ID_LEN))
}

/// Derive a fresh scheduler deploy ID for a source identity.
///
/// Sanitized version (sans build metadata, truncated to 31 chars), `_`,
/// then a stripped v4 UUID; the whole truncated to [`MAX_DEPLOY_ID_LEN`].
pub fn compute_deploy_id(source_id: &SourceId) -> String {
    let version = truncate(
        sanitize(&format_version(&source_id.version)),
        MAX_VERSION_LEN,
    );
    let unique = strip(&Uuid::new_v4().to_string());
    truncate(format!("{version}_{unique}"), MAX_DEPLOY_ID_LEN)
}
