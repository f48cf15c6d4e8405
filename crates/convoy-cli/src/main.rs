//! convoy — operator CLI for the convoy control plane.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod client;
mod commands;
mod poll;

use client::ApiClient;

#[derive(Parser)]
#[command(name = "convoy", about = "Drive deployments toward the intended manifest")]
struct Cli {
    /// Base URL of the convoy server.
    #[arg(long, global = true, default_value = "http://localhost:7171")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Deploy a version of an application into a cluster.
    Deploy {
        /// Source repository URL.
        #[arg(long)]
        repo: String,
        /// Directory offset within the repository.
        #[arg(long, default_value = "")]
        offset: String,
        /// Manifest flavor.
        #[arg(long, default_value = "")]
        flavor: String,
        /// Target cluster name.
        #[arg(long)]
        cluster: String,
        /// Semantic version tag to deploy.
        #[arg(long)]
        tag: String,
        /// Poll attempts before giving up (one per second).
        #[arg(long, default_value_t = 300)]
        poll_attempts: u32,
        /// Wait for the deploy to complete before returning.
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        wait_stable: bool,
    },

    /// Print the full intended deployment snapshot.
    Gdm,

    /// Read or write a single manifest.
    Manifest {
        #[command(subcommand)]
        action: ManifestAction,
    },
}

#[derive(Subcommand)]
enum ManifestAction {
    /// Print a manifest as JSON.
    Get {
        #[arg(long)]
        repo: String,
        #[arg(long, default_value = "")]
        offset: String,
        #[arg(long, default_value = "")]
        flavor: String,
    },
    /// Store a manifest from a JSON file.
    Set {
        #[arg(long)]
        repo: String,
        #[arg(long, default_value = "")]
        offset: String,
        #[arg(long, default_value = "")]
        flavor: String,
        /// Path to the manifest JSON.
        #[arg(long)]
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = ApiClient::new(&cli.server)?;

    match cli.command {
        Command::Deploy {
            repo,
            offset,
            flavor,
            cluster,
            tag,
            poll_attempts,
            wait_stable,
        } => {
            commands::deploy::run(
                &client,
                commands::deploy::DeployArgs {
                    repo,
                    offset,
                    flavor,
                    cluster,
                    tag,
                    poll_attempts,
                    wait: wait_stable,
                },
            )
            .await
        }
        Command::Gdm => commands::gdm::run(&client).await,
        Command::Manifest { action } => match action {
            ManifestAction::Get {
                repo,
                offset,
                flavor,
            } => commands::manifest::get(&client, &repo, &offset, &flavor).await,
            ManifestAction::Set {
                repo,
                offset,
                flavor,
                file,
            } => commands::manifest::set(&client, &repo, &offset, &flavor, &file).await,
        },
    }
}
