//! `convoy deploy` — set a deployment's version and watch it land.

use anyhow::{bail, Context, Result};

use convoy_api::SingleDeploymentBody;
use convoy_core::parse_version;

use crate::client::ApiClient;
use crate::poll::{poll_deploy_queue, PollOutcome};

pub struct DeployArgs {
    pub repo: String,
    pub offset: String,
    pub flavor: String,
    pub cluster: String,
    pub tag: String,
    pub poll_attempts: u32,
    pub wait: bool,
}

pub async fn run(client: &ApiClient, args: DeployArgs) -> Result<()> {
    let version = parse_version(&args.tag)
        .with_context(|| format!("not a semantic version: -tag {}", args.tag))?;

    let query = format!(
        "/single-deployment?repo={}&offset={}&flavor={}&cluster={}",
        args.repo, args.offset, args.flavor, args.cluster
    );
    let Some(retrieved) = client.retrieve::<SingleDeploymentBody>(&query).await? else {
        bail!(
            "no deployment for {} in cluster {:?}; add a manifest first",
            args.repo,
            args.cluster
        );
    };

    let mut body = retrieved.value;
    body.deployment.source_id.version = version;

    let location = client.update(&retrieved.updater, &body).await?;
    let Some(location) = location else {
        println!(
            "Desired version for {} in cluster {:?} already {}",
            args.repo, args.cluster, args.tag
        );
        return Ok(());
    };

    println!("Deployment queued: {location}");
    if !args.wait {
        return Ok(());
    }

    match poll_deploy_queue(client, &location, args.poll_attempts).await {
        PollOutcome::Success {
            deployment_id,
            elapsed,
        } => {
            println!("Deployment complete: {deployment_id} ({elapsed:.1?})");
            Ok(())
        }
        PollOutcome::Failed { reason, elapsed } => {
            bail!("deploy failed after {elapsed:.1?}: {reason}")
        }
    }
}
