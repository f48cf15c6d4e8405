//! `convoy gdm` — print the intended deployment snapshot.

use anyhow::Result;

use convoy_api::GdmBody;

use crate::client::ApiClient;

pub async fn run(client: &ApiClient) -> Result<()> {
    let body: GdmBody = client.get_json("/gdm").await?;

    println!("{:<60} {:<16} {:>9}  {}", "DEPLOYMENT", "VERSION", "INSTANCES", "KIND");
    for deployment in &body.deployments {
        println!(
            "{:<60} {:<16} {:>9}  {}",
            deployment.id().to_string(),
            deployment.source_id.version.to_string(),
            deployment.config.num_instances,
            deployment.kind
        );
    }
    Ok(())
}
