use chrono::Utc;
use tokio::time::sleep;
use tracing::info;

use crate::config::CollectorConfig;
use crate::github_graphql::{GithubGraphqlClient, SearchRequest};
use crate::models::{OutputRow, RepositoryBasic};

/// Phase one: search pages until the target count or the last page.
pub async fn collect_repositories(
    client: &GithubGraphqlClient,
    config: &CollectorConfig,
) -> Vec<RepositoryBasic> {
    info!(
        "Searching for {} repositories (page size {})",
        config.target_count,
        config.effective_page_size()
    );

    let request = SearchRequest {
        query: &config.search_query,
        target: config.target_count,
        page_size: config.effective_page_size(),
        page_delay: config.page_delay(),
    };
    client.search_repositories(&request).await
}

/// Phase two: one counters lookup per repository, one row per repository.
/// A failed lookup still yields a row.
pub async fn enrich_repositories(
    client: &GithubGraphqlClient,
    config: &CollectorConfig,
    basics: &[RepositoryBasic],
) -> Vec<OutputRow> {
    let total = basics.len();
    let mut rows = Vec::with_capacity(total);

    for (i, basic) in basics.iter().enumerate() {
        info!("[{}/{}] {}", i + 1, total, basic.full_name());

        let counters = client.fetch_counters(&basic.owner, &basic.name).await;
        rows.push(OutputRow::assemble(basic, counters, Utc::now()));

        sleep(config.repo_delay()).await;
    }

    rows
}
