//! `convoy manifest` — read and write single manifests.

use std::path::Path;

use anyhow::{Context, Result};

use convoy_state::Manifest;

use crate::client::ApiClient;

fn manifest_query(repo: &str, offset: &str, flavor: &str) -> String {
    format!("/manifest?repo={repo}&offset={offset}&flavor={flavor}")
}

pub async fn get(client: &ApiClient, repo: &str, offset: &str, flavor: &str) -> Result<()> {
    let manifest: Manifest = client
        .get_json(&manifest_query(repo, offset, flavor))
        .await?;
    println!("{}", serde_json::to_string_pretty(&manifest)?);
    Ok(())
}

pub async fn set(
    client: &ApiClient,
    repo: &str,
    offset: &str,
    flavor: &str,
    file: &Path,
) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("reading manifest from {}", file.display()))?;
    let manifest: Manifest =
        serde_json::from_str(&raw).context("manifest file is not valid JSON")?;

    let query = manifest_query(repo, offset, flavor);
    match client.retrieve::<Manifest>(&query).await? {
        // Merge onto the server's view so unknown fields survive.
        Some(retrieved) => {
            client.update(&retrieved.updater, &manifest).await?;
        }
        None => client.put_json(&query, &manifest).await?,
    }
    println!("Manifest stored for {repo}");
    Ok(())
}
