use anyhow::{anyhow, Context, Result};
use reqwest::{header, Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::GithubConfig;
use crate::github_types::{CountersData, RepositoryNode, SearchData};
use crate::models::{RepositoryBasic, RepositoryCounters};
use crate::retry::{classify_status, AttemptFailure, RetryPolicy};

const SEARCH_QUERY: &str = r#"
query($searchQuery: String!, $first: Int!, $after: String) {
  search(query: $searchQuery, type: REPOSITORY, first: $first, after: $after) {
    pageInfo { hasNextPage endCursor }
    nodes {
      ... on Repository {
        name
        owner { login }
        createdAt
        pushedAt
        primaryLanguage { name }
        url
      }
    }
  }
}
"#;

const COUNTERS_QUERY: &str = r#"
query($owner: String!, $name: String!) {
  repository(owner: $owner, name: $name) {
    pullRequests(states: MERGED) { totalCount }
    releases { totalCount }
    issues { totalCount }
    closedIssues: issues(states: CLOSED) { totalCount }
  }
}
"#;

#[derive(Clone)]
pub struct GithubGraphqlClient {
    client: Client,
    endpoint: String,
    token: String,
    retry: RetryPolicy,
}

#[derive(Deserialize)]
struct RawGraphQLResponse {
    data: Option<serde_json::Value>,
    errors: Option<Vec<GraphQLError>>,
}

#[derive(Deserialize)]
struct GraphQLError {
    message: String,
}

/// Where a paginated search should stop and how to pace itself.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    pub target: usize,
    pub page_size: usize,
    pub page_delay: Duration,
}

impl GithubGraphqlClient {
    pub fn new(config: &GithubConfig, retry: RetryPolicy) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.url.clone(),
            token: config.token.clone(),
            retry,
        })
    }

    /// Collects up to `target` repositories, page by page.
    ///
    /// A page that fails after all retries ends the search early; whatever was
    /// gathered before it is returned.
    pub async fn search_repositories(&self, request: &SearchRequest<'_>) -> Vec<RepositoryBasic> {
        let mut repos: Vec<RepositoryBasic> = Vec::new();
        let mut cursor: Option<String> = None;

        while repos.len() < request.target {
            let batch = request.page_size.min(request.target - repos.len());
            let variables = json!({
                "searchQuery": request.query,
                "first": batch,
                "after": cursor,
            });

            let page: SearchData = match self.execute(SEARCH_QUERY, variables).await {
                Ok(page) => page,
                Err(e) => {
                    warn!("Search page failed after {} collected, stopping: {:#}", repos.len(), e);
                    break;
                }
            };

            let search = page.search;
            repos.extend(
                search
                    .nodes
                    .unwrap_or_default()
                    .into_iter()
                    .flatten()
                    .filter_map(RepositoryNode::into_basic),
            );
            info!("Collected {}/{} repositories", repos.len().min(request.target), request.target);

            cursor = search.page_info.end_cursor;
            let exhausted = !search.page_info.has_next_page || cursor.is_none();
            if exhausted || repos.len() >= request.target {
                break;
            }

            tokio::time::sleep(request.page_delay).await;
        }

        repos.truncate(request.target);
        repos
    }

    /// Fetches the four activity counters for one repository.
    /// `None` means the lookup failed; the caller keeps the row regardless.
    pub async fn fetch_counters(&self, owner: &str, name: &str) -> Option<RepositoryCounters> {
        let variables = json!({ "owner": owner, "name": name });
        match self.execute::<CountersData>(COUNTERS_QUERY, variables).await {
            Ok(CountersData { repository: Some(node) }) => Some(node.into()),
            Ok(CountersData { repository: None }) => {
                warn!("Repository {}/{} not found, counters unknown", owner, name);
                None
            }
            Err(e) => {
                warn!("Counters for {}/{} unavailable: {:#}", owner, name, e);
                None
            }
        }
    }

    /// Runs one GraphQL operation, retrying per the client's [`RetryPolicy`].
    ///
    /// Exactly `max_attempts` requests are made before giving up. Rate-limit
    /// waits count as attempts.
    pub async fn execute<T: DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> Result<T> {
        let payload = json!({
            "query": query,
            "variables": variables
        });

        let mut last_failure = None;
        for attempt in 0..self.retry.max_attempts {
            let failure = match self.attempt(&payload).await {
                Ok(data) => return Ok(data),
                Err(failure) => failure,
            };

            let is_last = attempt + 1 == self.retry.max_attempts;
            if is_last {
                warn!("Attempt {}/{} failed: {}", attempt + 1, self.retry.max_attempts, failure);
            } else {
                let delay = self.retry.delay_for(&failure, attempt);
                match &failure {
                    AttemptFailure::RateLimited { .. } => {
                        warn!("Rate limit exhausted, sleeping {:?}", delay);
                    }
                    _ => {
                        warn!(
                            "Attempt {}/{} failed: {}; retrying in {:?}",
                            attempt + 1,
                            self.retry.max_attempts,
                            failure,
                            delay
                        );
                    }
                }
                tokio::time::sleep(delay).await;
            }
            last_failure = Some(failure);
        }

        Err(match last_failure {
            Some(failure) => anyhow!(failure).context(format!(
                "GraphQL request gave up after {} attempts",
                self.retry.max_attempts
            )),
            None => anyhow!("GraphQL request made no attempts"),
        })
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        payload: &serde_json::Value,
    ) -> Result<T, AttemptFailure> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.token)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, "application/vnd.github+json")
            .json(payload)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await?;

        if status != StatusCode::OK {
            return Err(classify_status(status, &headers, &text, &self.retry, chrono::Utc::now()));
        }

        let body: RawGraphQLResponse =
            serde_json::from_str(&text).map_err(|e| AttemptFailure::Malformed(e.to_string()))?;

        if let Some(errors) = body.errors.filter(|errors| !errors.is_empty()) {
            let msg = errors.iter().map(|e| e.message.as_str()).collect::<Vec<_>>().join(", ");
            return Err(AttemptFailure::GraphQl(msg));
        }

        let data = body
            .data
            .filter(|data| !data.is_null())
            .ok_or_else(|| AttemptFailure::Malformed("response has no data".into()))?;

        debug!("GraphQL request succeeded");
        serde_json::from_value(data).map_err(|e| AttemptFailure::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(server: &MockServer) -> GithubConfig {
        GithubConfig {
            url: format!("{}/graphql", server.uri()),
            token: "test-token".into(),
            user_agent: "repo-census-test".into(),
            timeout_seconds: 5,
        }
    }

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
            rate_limit_margin: Duration::ZERO,
            rate_limit_fallback: Duration::ZERO,
        }
    }

    fn repo_node(i: usize) -> Value {
        json!({
            "name": format!("repo{i}"),
            "owner": { "login": "owner" },
            "createdAt": "2020-01-01T00:00:00Z",
            "pushedAt": "2024-01-01T00:00:00Z",
            "primaryLanguage": { "name": "Rust" },
            "url": format!("https://github.com/owner/repo{i}")
        })
    }

    fn search_page(range: std::ops::Range<usize>, next: Option<&str>) -> Value {
        let nodes: Vec<Value> = range.map(repo_node).collect();
        json!({
            "data": {
                "search": {
                    "pageInfo": { "hasNextPage": next.is_some(), "endCursor": next },
                    "nodes": nodes
                }
            }
        })
    }

    fn search(target: usize) -> SearchRequest<'static> {
        SearchRequest {
            query: "stars:>1",
            target,
            page_size: 20,
            page_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn graphql_errors_use_exactly_max_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/graphql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": null,
                "errors": [{ "message": "Something went wrong" }]
            })))
            .expect(5)
            .mount(&server)
            .await;

        let client = GithubGraphqlClient::new(&test_config(&server), fast_retry(5)).unwrap();
        let result: Result<Value> = client.execute("query { viewer { login } }", json!({})).await;

        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("Something went wrong"));
        server.verify().await;
    }

    #[tokio::test]
    async fn sends_bearer_token_and_recovers_from_transient_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer test-token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "data": { "ok": true } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = GithubGraphqlClient::new(&test_config(&server), fast_retry(5)).unwrap();
        let data: Value = client.execute("query { ok }", json!({})).await.unwrap();

        assert_eq!(data["ok"], true);
        server.verify().await;
    }

    #[tokio::test]
    async fn rate_limit_wait_consumes_an_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(403)
                    .insert_header("X-RateLimit-Remaining", "0")
                    .insert_header("X-RateLimit-Reset", "1"),
            )
            .expect(3)
            .mount(&server)
            .await;

        let client = GithubGraphqlClient::new(&test_config(&server), fast_retry(3)).unwrap();
        let result: Result<Value> = client.execute("query { ok }", json!({})).await;

        assert!(result.is_err());
        server.verify().await;
    }

    #[tokio::test]
    async fn connection_refused_is_retried_then_reported() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = GithubConfig {
            url: format!("http://127.0.0.1:{port}/graphql"),
            token: "test-token".into(),
            user_agent: "repo-census-test".into(),
            timeout_seconds: 5,
        };

        let client = GithubGraphqlClient::new(&config, fast_retry(3)).unwrap();
        let result: Result<Value> = client.execute("query { ok }", json!({})).await;

        let err = result.unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("gave up after 3 attempts"));
        assert!(message.contains("network error"));
        // context, then the attempt failure; the reqwest error is not repeated as a source
        assert_eq!(err.chain().count(), 2);
    }

    #[tokio::test]
    async fn malformed_body_is_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "data": { "ok": 1 } })))
            .mount(&server)
            .await;

        let client = GithubGraphqlClient::new(&test_config(&server), fast_retry(2)).unwrap();
        let data: Value = client.execute("query { ok }", json!({})).await.unwrap();
        assert_eq!(data["ok"], 1);
    }

    #[tokio::test]
    async fn pagination_follows_cursor_until_last_page() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "variables": { "after": null } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_page(0..20, Some("c1"))))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "variables": { "after": "c1" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_page(20..40, Some("c2"))))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "variables": { "after": "c2" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_page(40..45, None)))
            .expect(1)
            .mount(&server)
            .await;

        let client = GithubGraphqlClient::new(&test_config(&server), fast_retry(3)).unwrap();
        let repos = client.search_repositories(&search(1000)).await;

        assert_eq!(repos.len(), 45);
        assert_eq!(repos[0].name, "repo0");
        assert_eq!(repos[44].name, "repo44");
        server.verify().await;
    }

    #[tokio::test]
    async fn pagination_requests_only_remaining_count() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "variables": { "first": 20, "after": null } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_page(0..20, Some("c1"))))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "variables": { "first": 5, "after": "c1" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_page(20..25, Some("c2"))))
            .expect(1)
            .mount(&server)
            .await;

        let client = GithubGraphqlClient::new(&test_config(&server), fast_retry(1)).unwrap();
        let repos = client.search_repositories(&search(25)).await;

        assert_eq!(repos.len(), 25);
        server.verify().await;
    }

    #[tokio::test]
    async fn failed_page_returns_partial_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "variables": { "after": null } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(search_page(0..20, Some("c1"))))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "variables": { "after": "c1" } })))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(&server)
            .await;

        let client = GithubGraphqlClient::new(&test_config(&server), fast_retry(2)).unwrap();
        let repos = client.search_repositories(&search(1000)).await;

        assert_eq!(repos.len(), 20);
        server.verify().await;
    }

    #[tokio::test]
    async fn counters_degrade_to_unknown() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "variables": { "owner": "gone", "name": "missing" } })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "data": { "repository": null } })),
            )
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "variables": { "owner": "o", "name": "r" } })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "repository": {
                    "pullRequests": { "totalCount": 10 },
                    "releases": { "totalCount": 1 },
                    "issues": { "totalCount": 12 },
                    "closedIssues": { "totalCount": 3 }
                } }
            })))
            .mount(&server)
            .await;

        let client = GithubGraphqlClient::new(&test_config(&server), fast_retry(1)).unwrap();

        assert_eq!(client.fetch_counters("gone", "missing").await, None);
        let counters = client.fetch_counters("o", "r").await.unwrap();
        assert_eq!(counters.merged_prs, 10);
        assert_eq!(counters.closed_ratio(), 0.25);
    }
}
