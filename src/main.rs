mod collector;
mod config;
mod github_graphql;
mod github_types;
mod models;
mod report;
mod retry;

use crate::config::Config;
use crate::github_graphql::GithubGraphqlClient;
use anyhow::{bail, Context, Result};
use std::path::Path;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // A missing token stops us here, before any request is sent
    let config = Config::new().context("Failed to load configuration")?;

    let client = GithubGraphqlClient::new(&config.github, config.retry.to_policy())?;

    let basics = collector::collect_repositories(&client, &config.collector).await;
    if basics.is_empty() {
        bail!("No repositories collected; nothing to write");
    }
    info!("Collected {} repositories, fetching counters", basics.len());

    let rows = collector::enrich_repositories(&client, &config.collector, &basics).await;

    let path = Path::new(&config.output.path);
    report::write_csv(path, &rows)?;
    info!("Wrote {} rows to {}", rows.len(), path.display());

    Ok(())
}
